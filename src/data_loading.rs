use crate::config::DetectionConfig;
use crate::{Epoch, Recording};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use ndarray::{Array1, Array2};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Suffixes of files written by `output`, skipped when scanning a directory.
const OUTPUT_SUFFIXES: [&str; 2] = ["_spikes", "_errors"];

/// Read exported sweeps from a CSV file.
///
/// The first column is time in seconds. Every other column is one sweep,
/// except columns whose header starts with `cmd`, which hold the command
/// waveform of the sweeps in the same order. The sampling rate is taken
/// from the first time step unless `points_per_ms` is given.
pub fn read_recording_csv(path: &Path, points_per_ms: Option<f64>) -> Result<Recording> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        bail!("{}: expected a time column and at least one sweep", path.display());
    }
    let is_command: Vec<bool> = headers
        .iter()
        .skip(1)
        .map(|h| h.to_ascii_lowercase().starts_with("cmd"))
        .collect();

    let mut time = Vec::new();
    let mut sweeps: Vec<Vec<f64>> = vec![Vec::new(); is_command.iter().filter(|c| !**c).count()];
    let mut commands: Vec<Vec<f64>> = vec![Vec::new(); is_command.iter().filter(|c| **c).count()];

    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let parse = |col: usize| -> Result<f64> {
            let field = record
                .get(col)
                .ok_or_else(|| anyhow!("row {}: missing column {}", row + 1, col))?;
            field
                .parse::<f64>()
                .with_context(|| format!("row {}: invalid number '{}'", row + 1, field))
        };

        time.push(parse(0)?);
        let (mut s, mut c) = (0, 0);
        for (offset, command) in is_command.iter().enumerate() {
            let value = parse(offset + 1)?;
            if *command {
                commands[c].push(value);
                c += 1;
            } else {
                sweeps[s].push(value);
                s += 1;
            }
        }
    }

    let points_per_ms = match points_per_ms {
        Some(rate) => rate,
        None => {
            if time.len() < 2 {
                bail!(
                    "{}: need two samples to derive the sampling rate",
                    path.display()
                );
            }
            1.0 / ((time[1] - time[0]) * 1000.0)
        }
    };
    debug!(
        "{}: {} sweeps of {} points at {} points/ms",
        path.display(),
        sweeps.len(),
        time.len(),
        points_per_ms
    );

    let n = time.len();
    let recording = Recording::new(Array1::from(time), columns(&sweeps, n), points_per_ms)
        .with_context(|| format!("Invalid recording in {}", path.display()))?;
    if commands.is_empty() {
        return Ok(recording);
    }
    if commands.len() != sweeps.len() {
        bail!(
            "{}: {} command columns for {} sweeps",
            path.display(),
            commands.len(),
            sweeps.len()
        );
    }
    Ok(recording.with_sweep_c(columns(&commands, n))?)
}

fn columns(data: &[Vec<f64>], n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, data.len()), |(row, col)| data[col][row])
}

/// Per-sweep epoch tables as a JSON array of arrays of
/// `{"start_point", "stop_point", "level"}`.
pub fn read_epochs_json(path: &Path) -> Result<Vec<Vec<Epoch>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse epochs from {}", path.display()))
}

pub fn read_detection_config(path: &Path) -> Result<DetectionConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    DetectionConfig::from_json_str(&json)
        .with_context(|| format!("Invalid detection parameters in {}", path.display()))
}

/// CSV recordings directly inside `dir`, sorted by name. Files written by a
/// previous run are skipped.
pub fn find_recordings(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        let is_output = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| OUTPUT_SUFFIXES.iter().any(|suffix| stem.ends_with(suffix)));
        if entry.file_type().is_file() && is_csv && !is_output {
            paths.push(path.to_path_buf());
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::io::Write;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_sweeps_and_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "cell.csv",
            "time,sweep0,cmd0,sweep1,cmd1\n\
             0.0000,-60,0,-61,0\n\
             0.0001,-59,10,-58,20\n\
             0.0002,-40,10,-30,20\n",
        );
        let recording = read_recording_csv(&path, None).unwrap();
        assert_eq!(recording.num_sweeps(), 2);
        assert_eq!(recording.num_points(), 3);
        assert_approx_eq!(recording.data_points_per_ms(), 10.0, 1e-9);

        let sweep = recording.sweep(1).unwrap();
        assert_eq!(sweep.y[2], -30.0);
        assert_eq!(sweep.c.unwrap()[1], 20.0);
    }

    #[test]
    fn rejects_bad_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.csv", "t,v\n0.0,-60\n0.1,oops\n");
        let err = read_recording_csv(&path, Some(10.0)).unwrap_err();
        assert!(format!("{:#}", err).contains("oops"));
    }

    #[test]
    fn finds_only_input_csvs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.csv", "t,v\n");
        write(dir.path(), "a.CSV", "t,v\n");
        write(dir.path(), "notes.txt", "");
        write(dir.path(), "out_run_spikes.csv", "");
        let found = find_recordings(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[test]
    fn reads_epochs_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let epochs = write(
            dir.path(),
            "epochs.json",
            r#"[[{"start_point": 0, "stop_point": 100, "level": 0.0},
                 {"start_point": 100, "stop_point": 300, "level": 0.5}]]"#,
        );
        let epochs = read_epochs_json(&epochs).unwrap();
        assert_eq!(epochs[0][1].level, 0.5);

        let config = write(dir.path(), "config.json", r#"{"refractory_ms": 80}"#);
        assert_eq!(read_detection_config(&config).unwrap().refractory_ms, 80.0);

        let bad = write(dir.path(), "bad.json", r#"{"refractory": 80}"#);
        assert!(read_detection_config(&bad).is_err());
    }
}
