use crate::config::{DetectionConfig, DetectionType};
use crate::error::{ErrorCategory, Feature, PendingError};
use crate::ms_to_points;
use crate::preprocessing::FilteredSweep;
use log::debug;
use ndarray::ArrayView1;

/// Window either side of a level crossing used to confirm the signal is rising.
pub const LEVEL_RISE_WINDOW_MS: f64 = 1.0;
/// Minimum spacing between level crossings, applied before refractory collapse.
pub const LEVEL_MIN_SPACING_MS: f64 = 10.0;

/// A surviving onset with its peak and any error raised while reducing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub point: usize,
    pub peak_point: usize,
    pub peak_value: f64,
    pub pending: Option<PendingError>,
}

/// Indices `i >= 1` where `values` crosses above `threshold`. Runs above the
/// threshold collapse to their first sample.
pub fn rising_edges(values: ArrayView1<f64>, threshold: f64) -> Vec<usize> {
    (1..values.len())
        .filter(|&i| values[i] > threshold && values[i - 1] <= threshold)
        .collect()
}

/// Earliest index of the maximum. Empty input gives `None`.
pub fn argmax(values: ArrayView1<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Earliest index of the minimum. Empty input gives `None`.
pub fn argmin(values: ArrayView1<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |(_, b)| v < b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Maximum of `vm[onset .. onset + window_points]`, clipped to the sweep end.
pub fn locate_peak(vm: ArrayView1<f64>, onset: usize, window_points: usize) -> (usize, f64) {
    let end = (onset + window_points.max(1)).min(vm.len());
    let offset = argmax(vm.slice(ndarray::s![onset..end])).unwrap_or(0);
    (onset + offset, vm[onset + offset])
}

pub fn within_time_window(
    points: Vec<usize>,
    time: ArrayView1<f64>,
    start_seconds: Option<f64>,
    stop_seconds: Option<f64>,
) -> Vec<usize> {
    points
        .into_iter()
        .filter(|&p| {
            start_seconds.map_or(true, |s| time[p] >= s)
                && stop_seconds.map_or(true, |s| time[p] <= s)
        })
        .collect()
}

/// Greedy left to right: keep a candidate only when it is at least
/// `min_points` (and never zero) after the last kept one.
pub fn collapse_by_spacing(candidates: Vec<Candidate>, min_points: usize) -> Vec<Candidate> {
    let spacing = min_points.max(1);
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match kept.last() {
            Some(last) if candidate.point < last.point + spacing => {}
            _ => kept.push(candidate),
        }
    }
    kept
}

/// Back a derivative crossing up to the foot of the upstroke.
///
/// Finds the derivative maximum in the `pre_points` after `point`, then the
/// last sample in the `pre_points` before `point` whose derivative is below
/// `fraction` of that maximum.
pub fn percent_of_max_foot(
    dvdt: ArrayView1<f64>,
    point: usize,
    pre_points: usize,
    fraction: f64,
) -> Option<usize> {
    let end = (point + pre_points.max(1)).min(dvdt.len());
    let max_offset = argmax(dvdt.slice(ndarray::s![point..end]))?;
    let target = dvdt[point + max_offset] * fraction;

    (point.saturating_sub(pre_points)..point)
        .rev()
        .find(|&i| dvdt[i] < target)
}

fn with_peaks(points: Vec<usize>, vm: ArrayView1<f64>, peak_points: usize) -> Vec<Candidate> {
    points
        .into_iter()
        .map(|point| {
            let (peak_point, peak_value) = locate_peak(vm, point, peak_points);
            Candidate {
                point,
                peak_point,
                peak_value,
                pending: None,
            }
        })
        .collect()
}

fn derivative_candidates(
    filtered: &FilteredSweep,
    time: ArrayView1<f64>,
    config: &DetectionConfig,
    points_per_ms: f64,
) -> Vec<Candidate> {
    let vm = filtered.vm.view();
    let dvdt = filtered.dvdt.view();
    let peak_points = ms_to_points(config.peak_window_ms, points_per_ms);
    let refractory_points = ms_to_points(config.refractory_ms, points_per_ms);

    let edges = rising_edges(dvdt, config.dvdt_threshold);
    let edge_count = edges.len();
    let points = within_time_window(edges, time, config.start_seconds, config.stop_seconds);

    let mut candidates: Vec<Candidate> = with_peaks(points, vm, peak_points)
        .into_iter()
        .filter(|c| c.peak_value >= config.mv_threshold)
        .collect();
    debug!(
        "dvdt > {}: {} crossings, {} with peak >= {} mV",
        config.dvdt_threshold,
        edge_count,
        candidates.len(),
        config.mv_threshold
    );
    candidates = collapse_by_spacing(candidates, refractory_points);

    if config.dvdt_percent_of_max > 0.0 {
        let pre_points = ms_to_points(config.dvdt_pre_window_ms, points_per_ms);
        for candidate in candidates.iter_mut() {
            match percent_of_max_foot(dvdt, candidate.point, pre_points, config.dvdt_percent_of_max)
            {
                Some(foot) => {
                    let (peak_point, peak_value) = locate_peak(vm, foot, peak_points);
                    candidate.point = foot;
                    candidate.peak_point = peak_point;
                    candidate.peak_value = peak_value;
                }
                None => {
                    candidate.pending = Some(PendingError {
                        point: Some(candidate.point),
                        category: ErrorCategory::NotFound,
                        feature: Feature::PercentOfMax,
                        detail: format!(
                            "dvdt never fell below {} of its maximum within {} ms before the crossing",
                            config.dvdt_percent_of_max, config.dvdt_pre_window_ms
                        ),
                    })
                }
            }
        }
        candidates.sort_by_key(|c| c.point);
        candidates = collapse_by_spacing(candidates, refractory_points);
    }
    candidates
}

fn level_candidates(
    filtered: &FilteredSweep,
    time: ArrayView1<f64>,
    config: &DetectionConfig,
    points_per_ms: f64,
) -> Vec<Candidate> {
    let vm = filtered.vm.view();
    let peak_points = ms_to_points(config.peak_window_ms, points_per_ms);
    let rise_points = ms_to_points(LEVEL_RISE_WINDOW_MS, points_per_ms).max(1);

    let edges = rising_edges(vm, config.mv_threshold);
    let edge_count = edges.len();
    let rising: Vec<usize> =
        within_time_window(edges, time, config.start_seconds, config.stop_seconds)
            .into_iter()
            .filter(|&p| {
                let before = vm.slice(ndarray::s![p.saturating_sub(rise_points)..p]);
                let after = vm.slice(ndarray::s![p..(p + rise_points).min(vm.len())]);
                match (before.mean(), after.mean()) {
                    (Some(b), Some(a)) => a > b,
                    _ => false,
                }
            })
            .collect();
    debug!(
        "vm > {} mV: {} crossings, {} rising",
        config.mv_threshold,
        edge_count,
        rising.len()
    );

    let candidates = with_peaks(rising, vm, peak_points);
    let candidates = collapse_by_spacing(
        candidates,
        ms_to_points(LEVEL_MIN_SPACING_MS, points_per_ms),
    );
    collapse_by_spacing(
        candidates,
        ms_to_points(config.refractory_ms, points_per_ms),
    )
}

/// Onsets of one sweep, reduced and paired with their peaks, in time order.
pub fn detect_candidates(
    filtered: &FilteredSweep,
    time: ArrayView1<f64>,
    config: &DetectionConfig,
    points_per_ms: f64,
) -> Vec<Candidate> {
    let candidates = match config.detection_type {
        DetectionType::Derivative => derivative_candidates(filtered, time, config, points_per_ms),
        DetectionType::Level => level_candidates(filtered, time, config, points_per_ms),
    };

    let before = candidates.len();
    let accepted: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| {
            config.only_peaks_above_mv.map_or(true, |lo| c.peak_value >= lo)
                && config.only_peaks_below_mv.map_or(true, |hi| c.peak_value <= hi)
        })
        .collect();
    if accepted.len() != before {
        debug!(
            "peak range rejected {} of {} candidates",
            before - accepted.len(),
            before
        );
    }
    accepted
}
