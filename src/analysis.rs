use crate::config::DetectionConfig;
use crate::epochs::annotate;
use crate::error::{ConfigError, DetectionError, SpikeError};
use crate::preprocessing::FilterCache;
use crate::spike_detection::detect_candidates;
use crate::spike_features::{extract_all, SweepContext};
use crate::spike_table::{Spike, SpikeTable};
use crate::Recording;
use chrono::{DateTime, Utc};
use log::{debug, info, log, warn, Level};
use serde::Serialize;
use std::collections::HashSet;

/// Per-sweep counts for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub sweep: usize,
    pub spike_count: usize,
    pub error_count: usize,
    pub mean_isi_ms: f64,
}

/// A sweep abandoned by a fatal error. Its spikes are not in the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub sweep: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub table: SpikeTable,
    pub sweeps: Vec<SweepSummary>,
    pub failures: Vec<SweepFailure>,
    pub config: DetectionConfig,
    pub analysis_time: DateTime<Utc>,
}

impl AnalysisReport {
    pub fn spike_count(&self) -> usize {
        self.table.len()
    }

    pub fn error_count(&self) -> usize {
        self.table.errors().len()
    }
}

type SweepRecords = Vec<(Spike, Vec<SpikeError>)>;

/// Runs detection with one configuration and memoizes filtered sweeps.
#[derive(Debug)]
pub struct SpikeDetector {
    config: DetectionConfig,
    cache: FilterCache,
}

impl SpikeDetector {
    pub fn new(config: DetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(SpikeDetector {
            config,
            cache: FilterCache::new(),
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: DetectionConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn cache(&self) -> &FilterCache {
        &self.cache
    }

    /// Detect spikes in every sweep of `recording`.
    pub fn detect(&mut self, recording: &Recording) -> Result<AnalysisReport, DetectionError> {
        let sweeps: Vec<usize> = (0..recording.num_sweeps()).collect();
        self.detect_sweeps(recording, &sweeps)
    }

    /// Detect spikes in the listed sweeps, in the order given. A sweep that
    /// fails is reported in `failures` and contributes no spikes.
    pub fn detect_sweeps(
        &mut self,
        recording: &Recording,
        sweeps: &[usize],
    ) -> Result<AnalysisReport, DetectionError> {
        self.config.validate()?;
        let mut seen = HashSet::with_capacity(sweeps.len());
        if let Some(&duplicate) = sweeps.iter().find(|&&sweep| !seen.insert(sweep)) {
            return Err(DetectionError::DuplicateSweep(duplicate));
        }
        self.cache.retain_recording(recording.id());
        let analysis_time = Utc::now();
        let mut table = SpikeTable::new();
        let mut summaries = Vec::with_capacity(sweeps.len());
        let mut failures = Vec::new();

        for &sweep in sweeps {
            match self.detect_sweep(recording, sweep, table.len()) {
                Ok(records) => {
                    let first = table.len();
                    let errors_before = table.errors().len();
                    for (spike, errors) in records {
                        table.append(spike, errors);
                    }
                    let summary = summarize(&table, sweep, first, errors_before);
                    debug!(
                        "sweep {}: {} spikes, {} errors",
                        sweep, summary.spike_count, summary.error_count
                    );
                    summaries.push(summary);
                }
                Err(e) => {
                    warn!("abandoning sweep {}: {}", sweep, e);
                    failures.push(SweepFailure {
                        sweep,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "detected {} spikes in {} sweeps ({} failed)",
            table.len(),
            summaries.len(),
            failures.len()
        );
        Ok(AnalysisReport {
            table,
            sweeps: summaries,
            failures,
            config: self.config.clone(),
            analysis_time,
        })
    }

    /// Build every record of one sweep without touching the table.
    fn detect_sweep(
        &mut self,
        recording: &Recording,
        sweep: usize,
        first_number: usize,
    ) -> Result<SweepRecords, DetectionError> {
        let view = recording
            .sweep(sweep)
            .ok_or(DetectionError::NoSuchSweep(sweep))?;
        let points_per_ms = view.data_points_per_ms;
        let filtered = self
            .cache
            .get_or_compute(recording.id(), &view, self.config.filter_settings())
            .map_err(|source| DetectionError::Filter { sweep, source })?;

        let candidates = detect_candidates(&filtered, view.x, &self.config, points_per_ms);
        let ctx = SweepContext {
            sweep,
            vm: filtered.vm.view(),
            dvdt: filtered.dvdt.view(),
            time: view.x,
            points_per_ms,
            config: &self.config,
        };
        let level = if self.config.verbose {
            Level::Debug
        } else {
            Level::Trace
        };

        let mut records: SweepRecords = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.into_iter().enumerate() {
            let mut spike = Spike::new(
                sweep,
                self.config.detection_type,
                candidate.point,
                candidate.peak_point,
            );
            spike.spike_number = first_number + i;
            let mut errors: Vec<SpikeError> = candidate
                .pending
                .into_iter()
                .map(|pending| pending.attach(spike.spike_number))
                .collect();

            let previous = records.last().map(|(spike, _)| spike);
            extract_all(&ctx, &mut spike, previous, &mut errors);

            if let Some(command) = view.c {
                spike.command_val = command[spike.threshold_pnt];
            }
            if let Some((epoch, epoch_level)) = annotate(view.epochs, spike.threshold_pnt) {
                spike.epoch = Some(epoch);
                spike.epoch_level = epoch_level;
            }

            log!(
                level,
                "spike {} sweep {}: onset {} peak {} ({:.2} mV), {} errors",
                spike.spike_number,
                sweep,
                spike.threshold_pnt,
                spike.peak_pnt,
                spike.peak_val,
                errors.len()
            );
            for error in &errors {
                log!(level, "  {}", error);
            }
            records.push((spike, errors));
        }
        Ok(records)
    }
}

fn summarize(table: &SpikeTable, sweep: usize, first: usize, errors_before: usize) -> SweepSummary {
    let isis: Vec<f64> = (first..table.len())
        .filter_map(|n| table.get(n))
        .map(|s| s.isi_ms)
        .filter(|isi| isi.is_finite())
        .collect();
    let mean_isi_ms = if isis.is_empty() {
        f64::NAN
    } else {
        isis.iter().sum::<f64>() / isis.len() as f64
    };
    SweepSummary {
        sweep,
        spike_count: table.len() - first,
        error_count: table.errors().len() - errors_before,
        mean_isi_ms,
    }
}
