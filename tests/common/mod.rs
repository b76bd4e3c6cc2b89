#![allow(dead_code)]

use spike_decoder::{DetectionConfig, Recording};

pub const POINTS_PER_MS: f64 = 10.0;

/// Piecewise-linear synthetic membrane potential.
pub struct TraceBuilder {
    points_per_ms: f64,
    samples: Vec<f64>,
}

impl TraceBuilder {
    pub fn new(points_per_ms: f64, start: f64) -> Self {
        TraceBuilder {
            points_per_ms,
            samples: vec![start],
        }
    }

    fn points(&self, ms: f64) -> usize {
        (ms * self.points_per_ms).round() as usize
    }

    fn last(&self) -> f64 {
        self.samples[self.samples.len() - 1]
    }

    pub fn hold(mut self, ms: f64) -> Self {
        let n = self.points(ms);
        let v = self.last();
        self.samples.extend(std::iter::repeat(v).take(n));
        self
    }

    /// Linear ramp ending exactly on `target` after `ms`.
    pub fn ramp_to(mut self, ms: f64, target: f64) -> Self {
        let n = self.points(ms);
        let v0 = self.last();
        self.samples
            .extend((1..=n).map(|k| v0 + (target - v0) * k as f64 / n as f64));
        self
    }

    /// Index of the last sample written so far.
    pub fn mark(&self) -> usize {
        self.samples.len() - 1
    }

    pub fn build(self) -> Vec<f64> {
        self.samples
    }
}

/// Unfiltered so onsets and peaks land on known samples.
pub fn exact_config() -> DetectionConfig {
    DetectionConfig {
        median_filter: 0,
        savitzky_golay_pnts: 0,
        ..Default::default()
    }
}

/// Five 40 mV pulses at 2 Hz from -60 mV. Returns the trace and the foot of
/// each upstroke.
pub fn pulse_train() -> (Vec<f64>, Vec<usize>) {
    let mut builder = TraceBuilder::new(POINTS_PER_MS, -60.0).hold(300.0);
    let mut onsets = Vec::new();
    for _ in 0..5 {
        onsets.push(builder.mark());
        builder = builder
            .ramp_to(1.0, -20.0)
            .ramp_to(5.0, -60.0)
            .hold(494.0);
    }
    (builder.build(), onsets)
}

/// Four pacemaker cycles at 2 Hz: 200 ms diastolic ramp from -70 to -50 mV,
/// 1 ms upstroke to +20 mV, 10 ms repolarization back to -70 mV.
pub fn pacemaker() -> (Vec<f64>, Vec<usize>) {
    let mut builder = TraceBuilder::new(POINTS_PER_MS, -70.0).hold(300.0);
    let mut onsets = Vec::new();
    for _ in 0..4 {
        builder = builder.ramp_to(200.0, -50.0);
        onsets.push(builder.mark());
        builder = builder
            .ramp_to(1.0, 20.0)
            .ramp_to(10.0, -70.0)
            .hold(289.0);
    }
    (builder.build(), onsets)
}

pub fn recording(sweeps: Vec<Vec<f64>>) -> Recording {
    Recording::from_sweeps(POINTS_PER_MS, sweeps).unwrap()
}
