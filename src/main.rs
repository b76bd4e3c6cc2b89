use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, warn};
use spike_decoder::config::Args;
use spike_decoder::data_loading::{
    find_recordings, read_detection_config, read_epochs_json, read_recording_csv,
};
use spike_decoder::output::write_analysis_to_csv;
use spike_decoder::{AnalysisReport, DetectionConfig, SpikeDetector};
use std::path::Path;

fn build_config(args: &Args) -> Result<DetectionConfig> {
    let mut config = match &args.config {
        Some(path) => read_detection_config(path)?,
        None => DetectionConfig::default(),
    };
    if let Some(detection_type) = args.detection_type {
        config.detection_type = detection_type;
    }
    for (key, value) in &args.overrides {
        config
            .set(key, value)
            .with_context(|| format!("Failed to apply --set {}={}", key, value))?;
    }
    debug!("Detection parameters: {:?}", config);
    Ok(config)
}

fn print_summary(path: &Path, report: &AnalysisReport) {
    println!(
        "{}: {} spikes, {} errors",
        path.display(),
        report.spike_count(),
        report.error_count()
    );
    for sweep in &report.sweeps {
        if sweep.mean_isi_ms.is_finite() {
            println!(
                "  sweep {}: {} spikes, mean ISI {:.1} ms ({:.2} Hz)",
                sweep.sweep,
                sweep.spike_count,
                sweep.mean_isi_ms,
                1000.0 / sweep.mean_isi_ms
            );
        } else {
            println!("  sweep {}: {} spikes", sweep.sweep, sweep.spike_count);
        }
    }
    for failure in &report.failures {
        println!("  sweep {} failed: {}", failure.sweep, failure.reason);
    }
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    let mut detector = SpikeDetector::new(build_config(&args)?)?;

    let inputs = if args.input_path.is_dir() {
        find_recordings(&args.input_path)?
    } else {
        vec![args.input_path.clone()]
    };
    if inputs.is_empty() {
        bail!("No CSV recordings found in {}", args.input_path.display());
    }
    let epochs = args.epochs.as_deref().map(read_epochs_json).transpose()?;

    for path in &inputs {
        println!("Loading file: {}", path.display());
        let mut recording = match read_recording_csv(path, args.points_per_ms) {
            Ok(recording) => recording,
            Err(e) if inputs.len() > 1 => {
                warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Some(epochs) = &epochs {
            recording = recording
                .with_epochs(epochs.clone())
                .with_context(|| format!("Epochs do not fit {}", path.display()))?;
        }

        let report = match &args.sweeps {
            Some(sweeps) => detector.detect_sweeps(&recording, sweeps)?,
            None => detector.detect(&recording)?,
        };
        print_summary(path, &report);

        if let Some(prefix) = &args.csv_output {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("recording");
            write_analysis_to_csv(prefix, name, &report)?;
        }
    }

    Ok(())
}
