pub mod analysis;
pub mod config;
pub mod data_loading;
pub mod epochs;
pub mod error;
pub mod output;
pub mod preprocessing;
pub mod spike_detection;
pub mod spike_features;
pub mod spike_table;

use error::RecordingError;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub use analysis::{AnalysisReport, SpikeDetector};
pub use config::{DetectionConfig, DetectionType};
pub use spike_table::{HalfWidth, Spike, SpikeTable, UserEdit};

static NEXT_RECORDING_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies the sample data of a recording so filtered copies can be memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingId(u64);

/// A labeled stimulus segment `[start_point, stop_point)` of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub start_point: usize,
    pub stop_point: usize,
    pub level: f64,
}

impl Epoch {
    pub fn contains(&self, point: usize) -> bool {
        point >= self.start_point && point < self.stop_point
    }
}

/// Fully buffered sweeps sharing one time axis.
///
/// `sweep_y` (and `sweep_c` when present) hold one column per sweep. The
/// recording is never mutated by detection.
#[derive(Debug, Clone)]
pub struct Recording {
    id: RecordingId,
    sweep_x: Array1<f64>,
    sweep_y: Array2<f64>,
    sweep_c: Option<Array2<f64>>,
    data_points_per_ms: f64,
    epochs: Vec<Vec<Epoch>>,
}

impl Recording {
    pub fn new(
        sweep_x: Array1<f64>,
        sweep_y: Array2<f64>,
        data_points_per_ms: f64,
    ) -> Result<Self, RecordingError> {
        if !(data_points_per_ms.is_finite() && data_points_per_ms > 0.0) {
            return Err(RecordingError::SamplingRate(data_points_per_ms));
        }
        if sweep_x.len() != sweep_y.nrows() {
            return Err(RecordingError::LengthMismatch {
                x: sweep_x.len(),
                y: sweep_y.nrows(),
            });
        }
        if sweep_y.ncols() == 0 {
            return Err(RecordingError::NoSweeps);
        }

        Ok(Recording {
            id: RecordingId(NEXT_RECORDING_ID.fetch_add(1, Ordering::Relaxed)),
            epochs: vec![Vec::new(); sweep_y.ncols()],
            sweep_x,
            sweep_y,
            sweep_c: None,
            data_points_per_ms,
        })
    }

    /// Build a recording from per-sweep sample vectors, deriving the time axis
    /// (seconds) from the sampling rate.
    pub fn from_sweeps(
        data_points_per_ms: f64,
        sweeps: Vec<Vec<f64>>,
    ) -> Result<Self, RecordingError> {
        let n = sweeps.first().map(Vec::len).unwrap_or(0);
        if let Some((sweep, other)) = sweeps.iter().enumerate().find(|(_, s)| s.len() != n) {
            return Err(RecordingError::RaggedSweep {
                sweep,
                expected: n,
                got: other.len(),
            });
        }

        let mut sweep_y = Array2::zeros((n, sweeps.len()));
        for (col, samples) in sweeps.iter().enumerate() {
            for (row, &value) in samples.iter().enumerate() {
                sweep_y[[row, col]] = value;
            }
        }
        let seconds_per_point = 1.0 / (data_points_per_ms * 1000.0);
        let sweep_x = Array1::from_iter((0..n).map(|i| i as f64 * seconds_per_point));

        Recording::new(sweep_x, sweep_y, data_points_per_ms)
    }

    /// Attach a command waveform with the same shape as `sweep_y`.
    pub fn with_sweep_c(mut self, sweep_c: Array2<f64>) -> Result<Self, RecordingError> {
        if sweep_c.dim() != self.sweep_y.dim() {
            return Err(RecordingError::CommandShape {
                c: sweep_c.dim(),
                y: self.sweep_y.dim(),
            });
        }
        self.sweep_c = Some(sweep_c);
        Ok(self)
    }

    /// Attach per-sweep epoch tables. Each table must be ordered and non-overlapping.
    pub fn with_epochs(mut self, epochs: Vec<Vec<Epoch>>) -> Result<Self, RecordingError> {
        if epochs.len() != self.num_sweeps() {
            return Err(RecordingError::EpochSweepCount {
                expected: self.num_sweeps(),
                got: epochs.len(),
            });
        }
        for (sweep, table) in epochs.iter().enumerate() {
            let mut previous_stop = 0;
            for (index, epoch) in table.iter().enumerate() {
                if epoch.start_point >= epoch.stop_point || epoch.start_point < previous_stop {
                    return Err(RecordingError::BadEpoch {
                        sweep,
                        index,
                        start: epoch.start_point,
                        stop: epoch.stop_point,
                    });
                }
                previous_stop = epoch.stop_point;
            }
        }
        self.epochs = epochs;
        Ok(self)
    }

    pub fn id(&self) -> RecordingId {
        self.id
    }

    pub fn num_sweeps(&self) -> usize {
        self.sweep_y.ncols()
    }

    pub fn num_points(&self) -> usize {
        self.sweep_y.nrows()
    }

    pub fn data_points_per_ms(&self) -> f64 {
        self.data_points_per_ms
    }

    pub fn sweep_x(&self) -> ArrayView1<'_, f64> {
        self.sweep_x.view()
    }

    pub fn sweep(&self, sweep: usize) -> Option<SweepView<'_>> {
        if sweep >= self.num_sweeps() {
            return None;
        }
        Some(SweepView {
            sweep,
            x: self.sweep_x.view(),
            y: self.sweep_y.column(sweep),
            c: self.sweep_c.as_ref().map(|c| c.column(sweep)),
            epochs: &self.epochs[sweep],
            data_points_per_ms: self.data_points_per_ms,
        })
    }
}

/// Borrowed view of a single sweep.
pub struct SweepView<'a> {
    pub sweep: usize,
    pub x: ArrayView1<'a, f64>,
    pub y: ArrayView1<'a, f64>,
    pub c: Option<ArrayView1<'a, f64>>,
    pub epochs: &'a [Epoch],
    pub data_points_per_ms: f64,
}

impl<'a> SweepView<'a> {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convert a duration in milliseconds to a whole number of samples.
pub fn ms_to_points(ms: f64, data_points_per_ms: f64) -> usize {
    (ms * data_points_per_ms).round().max(0.0) as usize
}

pub fn points_to_ms(points: f64, data_points_per_ms: f64) -> f64 {
    points / data_points_per_ms
}
