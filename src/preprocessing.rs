use crate::error::FilterError;
use crate::{RecordingId, SweepView};
use log::trace;
use ndarray::{Array1, ArrayView1};
use sci_rs::signal::filter::{savgol_coeffs_dyn, savgol_filter_dyn};
use std::collections::HashMap;
use std::sync::Arc;

/// Smoothing applied to a sweep and to its first derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterSettings {
    None,
    Median { width: usize },
    SavitzkyGolay { window: usize, poly: usize },
}

/// Index into `signal` with the edge sample repeated past either end.
fn nearest(signal: ArrayView1<f64>, index: isize) -> f64 {
    let last = signal.len() as isize - 1;
    signal[index.clamp(0, last) as usize]
}

pub fn median_filter(signal: ArrayView1<f64>, width: usize) -> Result<Array1<f64>, FilterError> {
    if width % 2 == 0 {
        return Err(FilterError::EvenMedianWidth(width));
    }
    if signal.is_empty() || width == 1 {
        return Ok(signal.to_owned());
    }

    let half = (width / 2) as isize;
    let mut window = Vec::with_capacity(width);
    let filtered = (0..signal.len() as isize)
        .map(|i| {
            window.clear();
            window.extend((i - half..=i + half).map(|j| nearest(signal, j)));
            window.sort_by(|a, b| a.total_cmp(b));
            window[half as usize]
        })
        .collect();
    Ok(filtered)
}

fn check_savitzky_golay(window: usize, poly: usize) -> Result<(), FilterError> {
    if window % 2 == 0 || window < poly + 2 {
        return Err(FilterError::SavitzkyGolayWindow { window, poly });
    }
    Ok(())
}

/// Least-squares polynomial smoothing weights for a centered window.
pub fn savitzky_golay_coefficients(window: usize, poly: usize) -> Result<Array1<f64>, FilterError> {
    check_savitzky_golay(window, poly)?;
    Ok(Array1::from(savgol_coeffs_dyn::<f64>(window, poly, None, None)))
}

/// Savitzky-Golay smoothing with the edge samples repeated past either end.
pub fn savitzky_golay(
    signal: ArrayView1<f64>,
    window: usize,
    poly: usize,
) -> Result<Array1<f64>, FilterError> {
    check_savitzky_golay(window, poly)?;
    Ok(Array1::from(savgol_filter_dyn(
        signal.iter(),
        window,
        poly,
        None,
        None,
    )))
}

pub fn filter_signal(
    signal: ArrayView1<f64>,
    settings: FilterSettings,
) -> Result<Array1<f64>, FilterError> {
    match settings {
        FilterSettings::None => Ok(signal.to_owned()),
        FilterSettings::Median { width } => median_filter(signal, width),
        FilterSettings::SavitzkyGolay { window, poly } => savitzky_golay(signal, window, poly),
    }
}

/// First derivative in units per ms.
///
/// Forward difference scaled by the sampling rate, smoothed with the same
/// filter and left-padded with a single zero so it aligns with `signal`.
pub fn first_derivative(
    signal: ArrayView1<f64>,
    data_points_per_ms: f64,
    settings: FilterSettings,
) -> Result<Array1<f64>, FilterError> {
    if signal.len() < 2 {
        return Ok(Array1::zeros(signal.len()));
    }
    let diff: Array1<f64> = signal
        .windows(2)
        .into_iter()
        .map(|w| (w[1] - w[0]) * data_points_per_ms)
        .collect();
    let diff = filter_signal(diff.view(), settings)?;

    let mut padded = Array1::zeros(signal.len());
    padded.slice_mut(ndarray::s![1..]).assign(&diff);
    Ok(padded)
}

/// The filtered membrane potential of one sweep and its filtered derivative.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredSweep {
    pub vm: Array1<f64>,
    pub dvdt: Array1<f64>,
}

impl FilteredSweep {
    pub fn compute(
        raw: ArrayView1<f64>,
        data_points_per_ms: f64,
        settings: FilterSettings,
    ) -> Result<Self, FilterError> {
        let vm = filter_signal(raw, settings)?;
        let dvdt = first_derivative(vm.view(), data_points_per_ms, settings)?;
        Ok(FilteredSweep { vm, dvdt })
    }
}

/// Memoized filter output, owned by a single detector.
#[derive(Debug, Default)]
pub struct FilterCache {
    entries: HashMap<(RecordingId, usize, FilterSettings), Arc<FilteredSweep>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        recording: RecordingId,
        sweep: &SweepView,
        settings: FilterSettings,
    ) -> Result<Arc<FilteredSweep>, FilterError> {
        let key = (recording, sweep.sweep, settings);
        if let Some(hit) = self.entries.get(&key) {
            trace!("filter cache hit for sweep {} ({:?})", sweep.sweep, settings);
            return Ok(Arc::clone(hit));
        }

        trace!("filtering sweep {} with {:?}", sweep.sweep, settings);
        let filtered = Arc::new(FilteredSweep::compute(
            sweep.y,
            sweep.data_points_per_ms,
            settings,
        )?);
        self.entries.insert(key, Arc::clone(&filtered));
        Ok(filtered)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry that belongs to another recording.
    pub fn retain_recording(&mut self, recording: RecordingId) {
        let before = self.entries.len();
        self.entries.retain(|(id, _, _), _| *id == recording);
        if self.entries.len() < before {
            trace!("evicted {} cached sweeps", before - self.entries.len());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Recording;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn savitzky_golay_5_2_matches_tabulated_weights() {
        let c = savitzky_golay_coefficients(5, 2).unwrap();
        let expected = [-3.0, 12.0, 17.0, 12.0, -3.0];
        for (got, want) in c.iter().zip(expected) {
            assert_approx_eq!(*got, want / 35.0, 1e-12);
        }
    }

    #[test]
    fn savitzky_golay_preserves_quadratics_away_from_edges() {
        let signal: Array1<f64> = (0..20).map(|i| 0.5 * (i as f64).powi(2) - 3.0 * i as f64).collect();
        let smooth = savitzky_golay(signal.view(), 7, 2).unwrap();
        for i in 3..17 {
            assert_approx_eq!(smooth[i], signal[i], 1e-9);
        }
    }

    #[test]
    fn invalid_windows_are_rejected() {
        assert!(savitzky_golay_coefficients(4, 2).is_err());
        assert!(savitzky_golay_coefficients(3, 3).is_err());
        assert!(savitzky_golay(array![1.0, 2.0, 3.0].view(), 3, 2).is_err());
        assert!(savitzky_golay(array![1.0, 2.0, 3.0].view(), 1, 0).is_err());
        assert_eq!(
            median_filter(array![1.0, 2.0].view(), 2),
            Err(FilterError::EvenMedianWidth(2))
        );
    }

    #[test]
    fn median_removes_impulse_and_keeps_edges() {
        let signal = array![1.0, 1.0, 100.0, 1.0, 1.0, 5.0];
        let smooth = median_filter(signal.view(), 3).unwrap();
        assert_eq!(smooth, array![1.0, 1.0, 1.0, 1.0, 1.0, 5.0]);
    }

    #[test]
    fn flat_baseline_survives_both_filters() {
        let flat = Array1::from_elem(12, -60.0);
        for settings in [
            FilterSettings::Median { width: 5 },
            FilterSettings::SavitzkyGolay { window: 5, poly: 2 },
        ] {
            let f = FilteredSweep::compute(flat.view(), 10.0, settings).unwrap();
            for v in f.vm.iter() {
                assert_approx_eq!(*v, -60.0, 1e-9);
            }
            for d in f.dvdt.iter() {
                assert_approx_eq!(*d, 0.0, 1e-9);
            }
        }
    }

    #[test]
    fn derivative_is_left_padded_and_scaled() {
        let ramp: Array1<f64> = (0..6).map(|i| i as f64 * 0.5).collect();
        let dvdt = first_derivative(ramp.view(), 10.0, FilterSettings::None).unwrap();
        assert_eq!(dvdt.len(), 6);
        assert_eq!(dvdt[0], 0.0);
        for d in dvdt.iter().skip(1) {
            assert_approx_eq!(*d, 5.0, 1e-12);
        }
    }

    #[test]
    fn cache_is_keyed_by_settings() {
        let recording = Recording::from_sweeps(10.0, vec![vec![0.0, 1.0, 0.0, 2.0, 0.0]]).unwrap();
        let sweep = recording.sweep(0).unwrap();
        let mut cache = FilterCache::new();

        let a = cache
            .get_or_compute(recording.id(), &sweep, FilterSettings::None)
            .unwrap();
        let b = cache
            .get_or_compute(recording.id(), &sweep, FilterSettings::None)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        cache
            .get_or_compute(recording.id(), &sweep, FilterSettings::Median { width: 3 })
            .unwrap();
        assert_eq!(cache.len(), 2);

        cache.retain_recording(recording.id());
        assert_eq!(cache.len(), 2);
        let other = Recording::from_sweeps(10.0, vec![vec![1.0, 2.0, 3.0]]).unwrap();
        cache.retain_recording(other.id());
        assert!(cache.is_empty());
    }
}
