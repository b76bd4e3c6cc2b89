use crate::config::DetectionConfig;
use crate::error::{make_error, ErrorCategory, Feature, SpikeError};
use crate::spike_detection::{argmax, argmin};
use crate::spike_table::{HalfWidth, Spike};
use crate::{ms_to_points, points_to_ms};
use ndarray::{s, ArrayView1};

/// Filtered arrays and settings shared by every extractor for one sweep.
pub struct SweepContext<'a> {
    pub sweep: usize,
    pub vm: ArrayView1<'a, f64>,
    pub dvdt: ArrayView1<'a, f64>,
    pub time: ArrayView1<'a, f64>,
    pub points_per_ms: f64,
    pub config: &'a DetectionConfig,
}

impl SweepContext<'_> {
    fn len(&self) -> usize {
        self.vm.len()
    }

    fn ms(&self, points: usize) -> f64 {
        points_to_ms(points as f64, self.points_per_ms)
    }
}

/// Fills some fields of `spike`. On failure leaves them undefined and pushes
/// an error; never aborts the spike.
pub type Extractor = fn(&SweepContext, &mut Spike, Option<&Spike>, &mut Vec<SpikeError>);

/// Run in order. Later extractors read fields written by earlier ones.
pub const EXTRACTORS: [Extractor; 7] = [
    onset_and_peak,
    pre_spike_minimum,
    early_diastolic,
    half_widths,
    derivative_extrema,
    interval,
    diastolic_duration,
];

pub fn extract_all(
    ctx: &SweepContext,
    spike: &mut Spike,
    previous: Option<&Spike>,
    errors: &mut Vec<SpikeError>,
) {
    for extractor in EXTRACTORS {
        extractor(ctx, spike, previous, errors);
    }
}

fn push(
    errors: &mut Vec<SpikeError>,
    spike: &Spike,
    point: Option<usize>,
    category: ErrorCategory,
    feature: Feature,
    detail: String,
) {
    errors.push(make_error(spike.spike_number, point, category, feature, detail));
}

/// Ordinary least squares. `None` when fewer than two points, no spread in
/// `x`, or a non-finite result.
pub fn linear_fit(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Option<(f64, f64)> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let mean_x = x.mean()?;
    let mean_y = y.mean()?;
    let (sxx, sxy) = x
        .iter()
        .zip(y.iter())
        .fold((0.0, 0.0), |(sxx, sxy), (&xi, &yi)| {
            let dx = xi - mean_x;
            (sxx + dx * dx, sxy + dx * (yi - mean_y))
        });
    if sxx <= 0.0 || !sxx.is_finite() {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    (slope.is_finite() && intercept.is_finite()).then_some((slope, intercept))
}

pub fn onset_and_peak(
    ctx: &SweepContext,
    spike: &mut Spike,
    _previous: Option<&Spike>,
    _errors: &mut Vec<SpikeError>,
) {
    let onset = spike.threshold_pnt;
    let peak = spike.peak_pnt;
    spike.threshold_sec = ctx.time[onset];
    spike.threshold_val = ctx.vm[onset];
    spike.threshold_val_dvdt = ctx.dvdt[onset];
    spike.peak_sec = ctx.time[peak];
    spike.peak_val = ctx.vm[peak];
    spike.time_to_peak_ms = ctx.ms(peak - onset);
}

/// Maximum diastolic potential before the onset.
pub fn pre_spike_minimum(
    ctx: &SweepContext,
    spike: &mut Spike,
    _previous: Option<&Spike>,
    errors: &mut Vec<SpikeError>,
) {
    let onset = spike.threshold_pnt;
    let window = ms_to_points(ctx.config.mdp_ms, ctx.points_per_ms);
    let start = match onset.checked_sub(window) {
        Some(start) => start,
        None => {
            push(
                errors,
                spike,
                Some(onset),
                ErrorCategory::Boundary,
                Feature::PreSpikeMinimum,
                format!(
                    "{} ms window before the onset was clipped at the sweep start",
                    ctx.config.mdp_ms
                ),
            );
            0
        }
    };

    let Some(offset) = argmin(ctx.vm.slice(s![start..onset])) else {
        push(
            errors,
            spike,
            Some(onset),
            ErrorCategory::NotFound,
            Feature::PreSpikeMinimum,
            "no samples before the onset".to_string(),
        );
        return;
    };
    let minimum = start + offset;

    let half = ms_to_points(ctx.config.avg_window_ms, ctx.points_per_ms) / 2;
    let lo = minimum.saturating_sub(half);
    let hi = (minimum + half + 1).min(ctx.len());
    let average = ctx.vm.slice(s![lo..hi]).mean().unwrap_or(ctx.vm[minimum]);
    spike.pre_min_val = average;
    spike.peak_height = spike.peak_val - average;

    match (start..onset).rev().find(|&i| ctx.vm[i] <= average) {
        Some(point) => spike.pre_min_pnt = Some(point),
        None => push(
            errors,
            spike,
            Some(minimum),
            ErrorCategory::NotFound,
            Feature::PreSpikeMinimum,
            format!("signal never returned to the averaged minimum {:.3}", average),
        ),
    }
}

/// Linear fit over the 10% to 50% stretch between the minimum and the onset.
pub fn early_diastolic(
    ctx: &SweepContext,
    spike: &mut Spike,
    _previous: Option<&Spike>,
    errors: &mut Vec<SpikeError>,
) {
    let Some(pre_min) = spike.pre_min_pnt else {
        push(
            errors,
            spike,
            None,
            ErrorCategory::Consistency,
            Feature::EarlyDiastolic,
            "pre-spike minimum point is undefined".to_string(),
        );
        return;
    };

    let span = (spike.threshold_pnt - pre_min) as f64;
    let lo = pre_min + (0.1 * span).round() as usize;
    let hi = pre_min + (0.5 * span).round() as usize;
    spike.edd_fit_start_pnt = Some(lo);
    spike.edd_fit_stop_pnt = Some(hi);

    let fit = linear_fit(
        ctx.time.slice(s![lo..=hi]),
        ctx.vm.slice(s![lo..=hi]),
    );
    let Some((slope, _)) = fit else {
        push(
            errors,
            spike,
            Some(lo),
            ErrorCategory::IllConditionedFit,
            Feature::EarlyDiastolic,
            format!("cannot fit a line over points {}..={}", lo, hi),
        );
        return;
    };

    spike.early_diastolic_duration_ms = ctx.ms(hi - lo);
    if slope <= ctx.config.low_edd_rate_warning {
        push(
            errors,
            spike,
            Some(lo),
            ErrorCategory::NotFound,
            Feature::EarlyDiastolic,
            format!(
                "rate {:.3} mV/s is at or below {} mV/s",
                slope, ctx.config.low_edd_rate_warning
            ),
        );
    } else {
        spike.early_diastolic_duration_rate = slope;
    }
}

pub fn half_widths(
    ctx: &SweepContext,
    spike: &mut Spike,
    _previous: Option<&Spike>,
    errors: &mut Vec<SpikeError>,
) {
    let onset = spike.threshold_pnt;
    let peak = spike.peak_pnt;
    let window = ms_to_points(ctx.config.half_width_window_ms, ctx.points_per_ms);
    let mut end = peak + window;
    if end > ctx.len() {
        end = ctx.len();
        push(
            errors,
            spike,
            Some(peak),
            ErrorCategory::Boundary,
            Feature::HalfWidth,
            format!(
                "{} ms window after the peak was clipped at the sweep end",
                ctx.config.half_width_window_ms
            ),
        );
    }

    let amplitude = spike.peak_val - spike.threshold_val;
    let mut widths = Vec::with_capacity(ctx.config.half_heights.len());
    for &height in &ctx.config.half_heights {
        let mut width = HalfWidth::unmeasured(height);
        let target = spike.threshold_val + amplitude * height / 100.0;

        let Some(falling) = (peak..end).find(|&i| ctx.vm[i] < target) else {
            push(
                errors,
                spike,
                Some(peak),
                ErrorCategory::NotFound,
                Feature::HalfWidth,
                format!(
                    "{}%: signal never fell below {:.3} after the peak",
                    height, target
                ),
            );
            widths.push(width);
            continue;
        };
        width.falling_pnt = Some(falling);
        width.falling_val = ctx.vm[falling];

        match (onset..=peak).find(|&i| ctx.vm[i] > width.falling_val) {
            Some(rising) => {
                width.rising_pnt = Some(rising);
                width.rising_val = ctx.vm[rising];
                width.width_pnts = Some(falling - rising);
                width.width_ms = ctx.ms(falling - rising);
            }
            None => push(
                errors,
                spike,
                Some(onset),
                ErrorCategory::NotFound,
                Feature::HalfWidth,
                format!("{}%: no rising crossing before the peak", height),
            ),
        }
        widths.push(width);
    }
    spike.widths = widths;
}

/// Maximum upstroke and minimum repolarization of the derivative.
pub fn derivative_extrema(
    ctx: &SweepContext,
    spike: &mut Spike,
    _previous: Option<&Spike>,
    errors: &mut Vec<SpikeError>,
) {
    let onset = spike.threshold_pnt;
    let peak = spike.peak_pnt;

    if let Some(offset) = argmax(ctx.dvdt.slice(s![onset..=peak])) {
        spike.pre_spike_dvdt_max_pnt = Some(onset + offset);
        spike.pre_spike_dvdt_max_val = ctx.dvdt[onset + offset];
    }

    let post = ms_to_points(ctx.config.dvdt_post_window_ms, ctx.points_per_ms);
    let mut end = peak + post + 1;
    if end > ctx.len() {
        end = ctx.len();
        push(
            errors,
            spike,
            Some(peak),
            ErrorCategory::Boundary,
            Feature::DerivativeExtrema,
            format!(
                "{} ms window after the peak was clipped at the sweep end",
                ctx.config.dvdt_post_window_ms
            ),
        );
    }
    if let Some(offset) = argmin(ctx.dvdt.slice(s![peak..end])) {
        spike.post_spike_dvdt_min_pnt = Some(peak + offset);
        spike.post_spike_dvdt_min_val = ctx.dvdt[peak + offset];
    }
}

/// Interval, frequency and cycle length relative to the previous spike.
pub fn interval(
    ctx: &SweepContext,
    spike: &mut Spike,
    previous: Option<&Spike>,
    errors: &mut Vec<SpikeError>,
) {
    let Some(previous) = previous else {
        return;
    };

    let isi = spike.threshold_pnt - previous.threshold_pnt;
    spike.isi_pnts = Some(isi);
    spike.isi_ms = ctx.ms(isi);
    spike.spike_freq_hz = 1000.0 / spike.isi_ms;

    match (previous.pre_min_pnt, spike.pre_min_pnt) {
        (Some(before), Some(current)) if current > before => {
            spike.cycle_length_pnts = Some(current - before);
            spike.cycle_length_ms = ctx.ms(current - before);
        }
        (before, current) => push(
            errors,
            spike,
            current,
            ErrorCategory::Consistency,
            Feature::CycleLength,
            format!(
                "needs increasing pre-spike minima, got {:?} then {:?}",
                before, current
            ),
        ),
    }
}

pub fn diastolic_duration(
    ctx: &SweepContext,
    spike: &mut Spike,
    _previous: Option<&Spike>,
    errors: &mut Vec<SpikeError>,
) {
    match spike.pre_min_pnt {
        Some(pre_min) => spike.diastolic_duration_ms = ctx.ms(spike.threshold_pnt - pre_min),
        None => push(
            errors,
            spike,
            None,
            ErrorCategory::Consistency,
            Feature::DiastolicDuration,
            "pre-spike minimum point is undefined".to_string(),
        ),
    }
}
