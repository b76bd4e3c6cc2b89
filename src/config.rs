use crate::error::ConfigError;
use crate::preprocessing::FilterSettings;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectionType {
    /// Threshold on the filtered first derivative (mV/ms)
    #[default]
    #[serde(rename = "dvdt", alias = "derivative")]
    Derivative,
    /// Threshold on the filtered membrane potential (mV)
    #[serde(rename = "mv", alias = "level")]
    Level,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionType::Derivative => "dvdt",
            DetectionType::Level => "mv",
        }
    }
}

impl FromStr for DetectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dvdt" | "derivative" => Ok(DetectionType::Derivative),
            "mv" | "level" => Ok(DetectionType::Level),
            _ => Err(format!(
                "Invalid detection type: {}. Use dvdt (derivative) or mv (level)",
                s
            )),
        }
    }
}

/// Parameters for one detection run.
///
/// Serializes to and from the flat string-keyed map used by configuration
/// files. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    #[serde(rename = "detectionType")]
    pub detection_type: DetectionType,
    #[serde(rename = "dvdtThreshold")]
    pub dvdt_threshold: f64,
    #[serde(rename = "mvThreshold")]
    pub mv_threshold: f64,
    #[serde(rename = "onlyPeaksAbove_mV")]
    pub only_peaks_above_mv: Option<f64>,
    #[serde(rename = "onlyPeaksBelow_mV")]
    pub only_peaks_below_mv: Option<f64>,
    #[serde(rename = "refractory_ms")]
    pub refractory_ms: f64,
    #[serde(rename = "peakWindow_ms")]
    pub peak_window_ms: f64,
    #[serde(rename = "dvdtPreWindow_ms")]
    pub dvdt_pre_window_ms: f64,
    #[serde(rename = "dvdtPostWindow_ms")]
    pub dvdt_post_window_ms: f64,
    #[serde(rename = "dvdt_percentOfMax")]
    pub dvdt_percent_of_max: f64,
    #[serde(rename = "mdp_ms")]
    pub mdp_ms: f64,
    #[serde(rename = "avgWindow_ms")]
    pub avg_window_ms: f64,
    #[serde(rename = "halfHeights")]
    pub half_heights: Vec<f64>,
    #[serde(rename = "halfWidthWindow_ms")]
    pub half_width_window_ms: f64,
    #[serde(rename = "medianFilter")]
    pub median_filter: usize,
    #[serde(rename = "SavitzkyGolay_pnts")]
    pub savitzky_golay_pnts: usize,
    #[serde(rename = "SavitzkyGolay_poly")]
    pub savitzky_golay_poly: usize,
    #[serde(rename = "lowEddRate_warning")]
    pub low_edd_rate_warning: f64,
    #[serde(rename = "startSeconds")]
    pub start_seconds: Option<f64>,
    #[serde(rename = "stopSeconds")]
    pub stop_seconds: Option<f64>,
    pub verbose: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            detection_type: DetectionType::Derivative,
            dvdt_threshold: 20.0,
            mv_threshold: -20.0,
            only_peaks_above_mv: None,
            only_peaks_below_mv: None,
            refractory_ms: 170.0,
            peak_window_ms: 100.0,
            dvdt_pre_window_ms: 10.0,
            dvdt_post_window_ms: 20.0,
            dvdt_percent_of_max: 0.1,
            mdp_ms: 250.0,
            avg_window_ms: 5.0,
            half_heights: vec![10.0, 20.0, 50.0, 80.0, 90.0],
            half_width_window_ms: 200.0,
            median_filter: 0,
            savitzky_golay_pnts: 5,
            savitzky_golay_poly: 2,
            low_edd_rate_warning: 8.0,
            start_seconds: None,
            stop_seconds: None,
            verbose: false,
        }
    }
}

impl DetectionConfig {
    /// Parse a JSON object of flat keys. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DetectionConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Set one parameter from its flat key. `raw` is read as JSON when it
    /// parses, otherwise as a bare string (so `detectionType=mv` works).
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let mut map = self.to_map();
        if !map.contains_key(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);

        let updated: DetectionConfig = serde_json::from_value(Value::Object(map))
            .map_err(|e| ConfigError::invalid(key, e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("dvdtThreshold", self.dvdt_threshold),
            ("mvThreshold", self.mv_threshold),
            ("lowEddRate_warning", self.low_edd_rate_warning),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::invalid(key, "must be finite"));
            }
        }
        for (key, value) in [
            ("refractory_ms", self.refractory_ms),
            ("peakWindow_ms", self.peak_window_ms),
            ("dvdtPreWindow_ms", self.dvdt_pre_window_ms),
            ("dvdtPostWindow_ms", self.dvdt_post_window_ms),
            ("mdp_ms", self.mdp_ms),
            ("avgWindow_ms", self.avg_window_ms),
            ("halfWidthWindow_ms", self.half_width_window_ms),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(key, "must be a non-negative duration"));
            }
        }

        if !(0.0..1.0).contains(&self.dvdt_percent_of_max) {
            return Err(ConfigError::invalid(
                "dvdt_percentOfMax",
                "must be in [0, 1)",
            ));
        }
        if let Some(h) = self
            .half_heights
            .iter()
            .find(|h| !(**h > 0.0 && **h < 100.0))
        {
            return Err(ConfigError::invalid(
                "halfHeights",
                format!("{} is not a percentage in (0, 100)", h),
            ));
        }

        if self.median_filter != 0 && self.median_filter % 2 == 0 {
            return Err(ConfigError::invalid("medianFilter", "width must be odd"));
        }
        if self.savitzky_golay_pnts != 0 {
            if self.savitzky_golay_pnts % 2 == 0 {
                return Err(ConfigError::invalid(
                    "SavitzkyGolay_pnts",
                    "window must be odd",
                ));
            }
            if self.savitzky_golay_poly + 2 > self.savitzky_golay_pnts {
                return Err(ConfigError::invalid(
                    "SavitzkyGolay_poly",
                    format!(
                        "order {} must be at most the window {} minus 2",
                        self.savitzky_golay_poly, self.savitzky_golay_pnts
                    ),
                ));
            }
        }

        if let (Some(start), Some(stop)) = (self.start_seconds, self.stop_seconds) {
            if start >= stop {
                return Err(ConfigError::invalid(
                    "stopSeconds",
                    format!("{} is not after startSeconds {}", stop, start),
                ));
            }
        }
        if let (Some(above), Some(below)) = (self.only_peaks_above_mv, self.only_peaks_below_mv) {
            if above > below {
                return Err(ConfigError::invalid(
                    "onlyPeaksBelow_mV",
                    format!("{} is below onlyPeaksAbove_mV {}", below, above),
                ));
            }
        }
        Ok(())
    }

    /// The filter applied to the signal and its derivative. Median wins over
    /// Savitzky-Golay.
    pub fn filter_settings(&self) -> FilterSettings {
        if self.median_filter > 0 {
            FilterSettings::Median {
                width: self.median_filter,
            }
        } else if self.savitzky_golay_pnts > 0 {
            FilterSettings::SavitzkyGolay {
                window: self.savitzky_golay_pnts,
                poly: self.savitzky_golay_poly,
            }
        } else {
            FilterSettings::None
        }
    }
}

/// Human-readable metadata for one configuration key.
#[derive(Debug, Clone, Copy)]
pub struct ParameterInfo {
    pub key: &'static str,
    pub units: &'static str,
    pub description: &'static str,
}

pub const PARAMETERS: &[ParameterInfo] = &[
    ParameterInfo {
        key: "detectionType",
        units: "",
        description: "Detect spikes using dV/dt threshold (dvdt) or membrane potential threshold (mv)",
    },
    ParameterInfo {
        key: "dvdtThreshold",
        units: "dVdt",
        description: "dV/dt threshold for a spike, will be backed up to dvdt_percentOfMax",
    },
    ParameterInfo {
        key: "mvThreshold",
        units: "mV",
        description: "mV threshold for spike AND minimum spike mV when detecting with dV/dt",
    },
    ParameterInfo {
        key: "onlyPeaksAbove_mV",
        units: "mV",
        description: "Accept only spikes whose peak is above this value",
    },
    ParameterInfo {
        key: "onlyPeaksBelow_mV",
        units: "mV",
        description: "Accept only spikes whose peak is below this value",
    },
    ParameterInfo {
        key: "refractory_ms",
        units: "ms",
        description: "Spikes within the refractory period of a kept spike are rejected",
    },
    ParameterInfo {
        key: "peakWindow_ms",
        units: "ms",
        description: "Window after threshold to search for the peak",
    },
    ParameterInfo {
        key: "dvdtPreWindow_ms",
        units: "ms",
        description: "Window around threshold to search for the dV/dt maximum and its foot",
    },
    ParameterInfo {
        key: "dvdtPostWindow_ms",
        units: "ms",
        description: "Window after the peak to search for the minimum dV/dt",
    },
    ParameterInfo {
        key: "dvdt_percentOfMax",
        units: "fraction",
        description: "Fraction of the maximum dV/dt used to back up the threshold, 0 disables",
    },
    ParameterInfo {
        key: "mdp_ms",
        units: "ms",
        description: "Window before threshold to search for the maximum diastolic potential",
    },
    ParameterInfo {
        key: "avgWindow_ms",
        units: "ms",
        description: "Window centered on the MDP to average over",
    },
    ParameterInfo {
        key: "halfHeights",
        units: "%",
        description: "Heights, as percent of spike amplitude, at which to measure widths",
    },
    ParameterInfo {
        key: "halfWidthWindow_ms",
        units: "ms",
        description: "Window after the peak to search for the falling phase of each width",
    },
    ParameterInfo {
        key: "medianFilter",
        units: "points",
        description: "Median filter width, odd, 0 disables",
    },
    ParameterInfo {
        key: "SavitzkyGolay_pnts",
        units: "points",
        description: "Savitzky-Golay window, odd, 0 disables",
    },
    ParameterInfo {
        key: "SavitzkyGolay_poly",
        units: "order",
        description: "Savitzky-Golay polynomial order",
    },
    ParameterInfo {
        key: "lowEddRate_warning",
        units: "mV/s",
        description: "EDD rates at or below this value are reported as errors",
    },
    ParameterInfo {
        key: "startSeconds",
        units: "s",
        description: "Only detect spikes at or after this time",
    },
    ParameterInfo {
        key: "stopSeconds",
        units: "s",
        description: "Only detect spikes at or before this time",
    },
    ParameterInfo {
        key: "verbose",
        units: "",
        description: "Log per-spike diagnostics",
    },
];

pub fn parameter_info(key: &str) -> Option<&'static ParameterInfo> {
    PARAMETERS.iter().find(|p| p.key == key)
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid override: {}. Use key=value", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

/// Detect action potentials in exported sweep CSV files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory containing sweep CSV files or path to a single CSV
    #[arg(help = "Directory containing sweep CSV files or path to a single CSV")]
    pub input_path: PathBuf,

    /// Sampling rate in points per ms, derived from the time column when omitted
    #[arg(long)]
    pub points_per_ms: Option<f64>,

    /// JSON file of detection parameters (flat keys)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override one detection parameter, e.g. --set refractory_ms=50
    #[arg(long = "set", value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,

    /// Detection strategy (dvdt or mv)
    #[arg(long)]
    pub detection_type: Option<DetectionType>,

    /// JSON file with per-sweep epoch tables
    #[arg(long)]
    pub epochs: Option<PathBuf>,

    /// Only analyze these sweeps (comma separated), defaults to all
    #[arg(long, value_delimiter = ',')]
    pub sweeps: Option<Vec<usize>>,

    /// CSV output file prefix (e.g. /path/to/output/prefix)
    #[arg(long)]
    pub csv_output: Option<String>,
}
