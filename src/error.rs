use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Rejected detection parameters. Raised before any detection work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown detection parameter '{0}'")]
    UnknownKey(String),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("malformed detection configuration: {0}")]
    Malformed(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordingError {
    #[error("data points per ms must be positive and finite, got {0}")]
    SamplingRate(f64),
    #[error("sweep_x has {x} points but sweep_y has {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("recording has no sweeps")]
    NoSweeps,
    #[error("sweep {sweep} has {got} points, expected {expected}")]
    RaggedSweep {
        sweep: usize,
        expected: usize,
        got: usize,
    },
    #[error("sweep_c shape {c:?} does not match sweep_y shape {y:?}")]
    CommandShape { c: (usize, usize), y: (usize, usize) },
    #[error("epochs supplied for {got} sweeps, recording has {expected}")]
    EpochSweepCount { expected: usize, got: usize },
    #[error("sweep {sweep}: epoch {index} [{start}, {stop}) is empty or overlaps its predecessor")]
    BadEpoch {
        sweep: usize,
        index: usize,
        start: usize,
        stop: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("median filter width must be odd, got {0}")]
    EvenMedianWidth(usize),
    #[error("Savitzky-Golay window {window} must be odd and exceed polynomial order {poly} by at least 2")]
    SavitzkyGolayWindow { window: usize, poly: usize },
}

/// Fatal errors. At sweep level these abandon only the affected sweep.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("sweep {0} does not exist")]
    NoSuchSweep(usize),
    #[error("sweep {0} is listed more than once")]
    DuplicateSweep(usize),
    #[error("sweep {sweep}: {source}")]
    Filter { sweep: usize, source: FilterError },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("no spike with number {0}")]
    NoSuchSpike(usize),
}

/// Non-fatal failure classes attached to individual spikes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// A search window ran past the start or end of the sweep and was clipped.
    Boundary,
    /// An expected crossing, extremum or fit window was missing.
    NotFound,
    IllConditionedFit,
    /// A derived value depends on a sibling field that is undefined.
    Consistency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCategory::Boundary => "boundary",
            ErrorCategory::NotFound => "not-found",
            ErrorCategory::IllConditionedFit => "ill-conditioned-fit",
            ErrorCategory::Consistency => "consistency",
        })
    }
}

/// The stage that raised a spike error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    PercentOfMax,
    PreSpikeMinimum,
    EarlyDiastolic,
    HalfWidth,
    DerivativeExtrema,
    CycleLength,
    DiastolicDuration,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Feature::PercentOfMax => "dvdt percent of max",
            Feature::PreSpikeMinimum => "pre-spike minimum",
            Feature::EarlyDiastolic => "early diastolic fit",
            Feature::HalfWidth => "half-width",
            Feature::DerivativeExtrema => "dvdt extrema",
            Feature::CycleLength => "cycle length",
            Feature::DiastolicDuration => "diastolic duration",
        })
    }
}

/// One diagnostic row of the error table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpikeError {
    pub spike_number: usize,
    pub point: Option<usize>,
    pub category: ErrorCategory,
    pub feature: Feature,
    pub detail: String,
}

impl fmt::Display for SpikeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spike {} ({}, {}): {}",
            self.spike_number, self.feature, self.category, self.detail
        )
    }
}

pub fn make_error(
    spike_number: usize,
    point: Option<usize>,
    category: ErrorCategory,
    feature: Feature,
    detail: impl Into<String>,
) -> SpikeError {
    SpikeError {
        spike_number,
        point,
        category,
        feature,
        detail: detail.into(),
    }
}

/// An error raised while reducing candidates, before the spike has a number.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingError {
    pub point: Option<usize>,
    pub category: ErrorCategory,
    pub feature: Feature,
    pub detail: String,
}

impl PendingError {
    pub fn attach(self, spike_number: usize) -> SpikeError {
        make_error(
            spike_number,
            self.point,
            self.category,
            self.feature,
            self.detail,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_error_takes_spike_number() {
        let pending = PendingError {
            point: Some(12),
            category: ErrorCategory::NotFound,
            feature: Feature::PercentOfMax,
            detail: "no foot".to_string(),
        };
        let error = pending.attach(7);
        assert_eq!(error.spike_number, 7);
        assert_eq!(error.point, Some(12));
        assert_eq!(
            error.to_string(),
            "spike 7 (dvdt percent of max, not-found): no foot"
        );
    }

    #[test]
    fn categories_serialize_kebab_case() {
        let value = serde_json::to_value(ErrorCategory::IllConditionedFit).unwrap();
        assert_eq!(value, serde_json::json!("ill-conditioned-fit"));
    }
}
