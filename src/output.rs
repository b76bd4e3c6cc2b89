use crate::AnalysisReport;
use anyhow::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};

fn output_path(base_path: &str, recording: &str, table: &str) -> Result<PathBuf> {
    let path = Path::new(base_path);
    let dir = path.parent().unwrap_or(Path::new("."));

    // Create directory if it doesn't exist
    std::fs::create_dir_all(dir)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("csv");

    Ok(dir.join(format!("{}_{}_{}.{}", stem, recording, table, ext)))
}

fn field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write the spike table and the error table of `report` next to `base_path`.
/// Undefined values are written as empty fields.
pub fn write_analysis_to_csv(base_path: &str, recording: &str, report: &AnalysisReport) -> Result<()> {
    let spikes_path = output_path(base_path, recording, "spikes")?;
    println!("Writing results to {}", spikes_path.display());
    let mut writer = csv::Writer::from_path(&spikes_path)?;

    let columns = report.table.columns();
    writer.write_record(columns.iter().map(|(name, _)| name.as_str()))?;
    for row in 0..report.table.len() {
        writer.write_record(columns.iter().map(|(_, values)| field(&values[row])))?;
    }
    writer.flush()?;

    let errors_path = output_path(base_path, recording, "errors")?;
    println!("Writing errors to {}", errors_path.display());
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&errors_path)?;
    writer.write_record(["spikeNumber", "point", "category", "feature", "detail"])?;
    for error in report.table.errors() {
        writer.serialize(error)?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DetectionConfig, Recording, SpikeDetector};

    #[test]
    fn writes_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut trace = vec![-60.0; 2000];
        for (i, v) in trace.iter_mut().enumerate().skip(1000).take(10) {
            *v = -60.0 + 4.0 * (i - 999) as f64;
        }
        let recording = Recording::from_sweeps(10.0, vec![trace]).unwrap();
        let config = DetectionConfig {
            savitzky_golay_pnts: 0,
            ..Default::default()
        };
        let report = SpikeDetector::new(config).unwrap().detect(&recording).unwrap();
        assert_eq!(report.spike_count(), 1);

        let base = dir.path().join("out").join("run.csv");
        write_analysis_to_csv(base.to_str().unwrap(), "cell1", &report).unwrap();

        let spikes = std::fs::read_to_string(dir.path().join("out/run_cell1_spikes.csv")).unwrap();
        let mut lines = spikes.lines();
        assert!(lines.next().unwrap().starts_with("spikeNumber,sweep,"));
        assert_eq!(lines.count(), 1);

        let errors = std::fs::read_to_string(dir.path().join("out/run_cell1_errors.csv")).unwrap();
        assert!(errors.starts_with("spikeNumber,point,category,feature,detail"));
    }
}
