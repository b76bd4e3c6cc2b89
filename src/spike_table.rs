use crate::config::DetectionType;
use crate::error::{SpikeError, TableError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Width of a spike measured at `half_height` percent of its amplitude.
/// Unmeasured fields stay `None` / NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HalfWidth {
    pub half_height: f64,
    pub rising_pnt: Option<usize>,
    pub rising_val: f64,
    pub falling_pnt: Option<usize>,
    pub falling_val: f64,
    pub width_pnts: Option<usize>,
    pub width_ms: f64,
}

impl HalfWidth {
    pub fn unmeasured(half_height: f64) -> Self {
        HalfWidth {
            half_height,
            rising_pnt: None,
            rising_val: f64::NAN,
            falling_pnt: None,
            falling_val: f64::NAN,
            width_pnts: None,
            width_ms: f64::NAN,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.width_pnts.is_some()
    }
}

/// One detected action potential and its features.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spike {
    pub spike_number: usize,
    pub sweep: usize,
    pub sweep_spike_number: usize,
    pub detection_type: DetectionType,

    pub threshold_pnt: usize,
    pub threshold_sec: f64,
    pub threshold_val: f64,
    pub threshold_val_dvdt: f64,
    pub command_val: f64,

    pub peak_pnt: usize,
    pub peak_sec: f64,
    pub peak_val: f64,
    pub peak_height: f64,
    pub time_to_peak_ms: f64,

    pub pre_min_pnt: Option<usize>,
    pub pre_min_val: f64,

    pub early_diastolic_duration_ms: f64,
    pub early_diastolic_duration_rate: f64,
    pub edd_fit_start_pnt: Option<usize>,
    pub edd_fit_stop_pnt: Option<usize>,

    pub pre_spike_dvdt_max_pnt: Option<usize>,
    pub pre_spike_dvdt_max_val: f64,
    pub post_spike_dvdt_min_pnt: Option<usize>,
    pub post_spike_dvdt_min_val: f64,

    pub isi_pnts: Option<usize>,
    pub isi_ms: f64,
    pub spike_freq_hz: f64,
    pub cycle_length_pnts: Option<usize>,
    pub cycle_length_ms: f64,
    pub diastolic_duration_ms: f64,

    #[serde(skip)]
    pub widths: Vec<HalfWidth>,

    pub epoch: Option<usize>,
    pub epoch_level: f64,

    pub include: bool,
    pub condition: Option<String>,
    pub user_type: u32,
    pub modified: Option<DateTime<Utc>>,
}

impl Spike {
    /// A record with only its onset and peak known. Numbers are assigned on append.
    pub fn new(
        sweep: usize,
        detection_type: DetectionType,
        threshold_pnt: usize,
        peak_pnt: usize,
    ) -> Self {
        Spike {
            spike_number: 0,
            sweep,
            sweep_spike_number: 0,
            detection_type,
            threshold_pnt,
            threshold_sec: f64::NAN,
            threshold_val: f64::NAN,
            threshold_val_dvdt: f64::NAN,
            command_val: f64::NAN,
            peak_pnt,
            peak_sec: f64::NAN,
            peak_val: f64::NAN,
            peak_height: f64::NAN,
            time_to_peak_ms: f64::NAN,
            pre_min_pnt: None,
            pre_min_val: f64::NAN,
            early_diastolic_duration_ms: f64::NAN,
            early_diastolic_duration_rate: f64::NAN,
            edd_fit_start_pnt: None,
            edd_fit_stop_pnt: None,
            pre_spike_dvdt_max_pnt: None,
            pre_spike_dvdt_max_val: f64::NAN,
            post_spike_dvdt_min_pnt: None,
            post_spike_dvdt_min_val: f64::NAN,
            isi_pnts: None,
            isi_ms: f64::NAN,
            spike_freq_hz: f64::NAN,
            cycle_length_pnts: None,
            cycle_length_ms: f64::NAN,
            diastolic_duration_ms: f64::NAN,
            widths: Vec::new(),
            epoch: None,
            epoch_level: f64::NAN,
            include: true,
            condition: None,
            user_type: 0,
            modified: None,
        }
    }

    pub fn width_at(&self, half_height: f64) -> Option<&HalfWidth> {
        self.widths.iter().find(|w| w.half_height == half_height)
    }
}

/// The user-editable fields of a spike.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEdit {
    Include(bool),
    Condition(String),
    UserType(u32),
}

/// Append-only spike records in detection order, with their errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeTable {
    spikes: Vec<Spike>,
    errors: Vec<SpikeError>,
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn object(spike: &Spike) -> Map<String, Value> {
    match serde_json::to_value(spike) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

impl SpikeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a spike, assigning its global and per-sweep numbers. Its errors
    /// are re-keyed to the assigned number. Returns the spike number.
    pub fn append(&mut self, mut spike: Spike, errors: Vec<SpikeError>) -> usize {
        let number = self.spikes.len();
        spike.spike_number = number;
        spike.sweep_spike_number = match self.spikes.last() {
            Some(last) if last.sweep == spike.sweep => last.sweep_spike_number + 1,
            _ => 0,
        };
        self.spikes.push(spike);
        self.errors.extend(errors.into_iter().map(|mut e| {
            e.spike_number = number;
            e
        }));
        number
    }

    pub fn len(&self) -> usize {
        self.spikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spikes.is_empty()
    }

    pub fn get(&self, spike_number: usize) -> Option<&Spike> {
        self.spikes.get(spike_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Spike> {
        self.spikes.iter()
    }

    pub fn sweep(&self, sweep: usize) -> impl Iterator<Item = &Spike> {
        self.spikes.iter().filter(move |s| s.sweep == sweep)
    }

    pub fn errors(&self) -> &[SpikeError] {
        &self.errors
    }

    pub fn errors_for(&self, spike_number: usize) -> &[SpikeError] {
        let start = self.errors.partition_point(|e| e.spike_number < spike_number);
        let end = self.errors.partition_point(|e| e.spike_number <= spike_number);
        &self.errors[start..end]
    }

    pub fn edit(&mut self, spike_number: usize, edit: UserEdit) -> Result<(), TableError> {
        let spike = self
            .spikes
            .get_mut(spike_number)
            .ok_or(TableError::NoSuchSpike(spike_number))?;
        match edit {
            UserEdit::Include(include) => spike.include = include,
            UserEdit::Condition(condition) => spike.condition = Some(condition),
            UserEdit::UserType(user_type) => spike.user_type = user_type,
        }
        spike.modified = Some(Utc::now());
        Ok(())
    }

    /// Column name to values, one value per spike. Widths are flattened into
    /// per-height columns and undefined numbers become `null`.
    pub fn columns(&self) -> Vec<(String, Vec<Value>)> {
        let template = Spike::new(0, DetectionType::default(), 0, 0);
        let mut columns: Vec<(String, Vec<Value>)> = object(self.spikes.first().unwrap_or(&template))
            .keys()
            .map(|k| (k.clone(), Vec::with_capacity(self.spikes.len())))
            .collect();

        for spike in &self.spikes {
            let map = object(spike);
            for (name, values) in columns.iter_mut() {
                values.push(map.get(name).cloned().unwrap_or(Value::Null));
            }
        }

        let heights: Vec<f64> = self
            .spikes
            .first()
            .map(|s| s.widths.iter().map(|w| w.half_height).collect())
            .unwrap_or_default();
        for (index, height) in heights.iter().enumerate() {
            let width = |s: &Spike| s.widths.get(index).cloned();
            let pnt = |p: Option<usize>| p.map_or(Value::Null, Value::from);
            columns.push((
                format!("widthMs_{}", height),
                self.spikes
                    .iter()
                    .map(|s| width(s).map_or(Value::Null, |w| number(w.width_ms)))
                    .collect(),
            ));
            columns.push((
                format!("widthPnts_{}", height),
                self.spikes
                    .iter()
                    .map(|s| width(s).map_or(Value::Null, |w| pnt(w.width_pnts)))
                    .collect(),
            ));
            columns.push((
                format!("risingPnt_{}", height),
                self.spikes
                    .iter()
                    .map(|s| width(s).map_or(Value::Null, |w| pnt(w.rising_pnt)))
                    .collect(),
            ));
            columns.push((
                format!("fallingPnt_{}", height),
                self.spikes
                    .iter()
                    .map(|s| width(s).map_or(Value::Null, |w| pnt(w.falling_pnt)))
                    .collect(),
            ));
        }
        columns
    }

    /// The error table as one object per error, keyed like the spike columns.
    pub fn error_rows(&self) -> Vec<Map<String, Value>> {
        self.errors
            .iter()
            .filter_map(|e| match serde_json::to_value(e) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{make_error, ErrorCategory, Feature};

    fn spike(sweep: usize, onset: usize) -> Spike {
        let mut spike = Spike::new(sweep, DetectionType::Derivative, onset, onset + 10);
        spike.widths = vec![HalfWidth::unmeasured(50.0)];
        spike
    }

    #[test]
    fn append_assigns_numbers() {
        let mut table = SpikeTable::new();
        assert_eq!(table.append(spike(0, 10), vec![]), 0);
        assert_eq!(table.append(spike(0, 500), vec![]), 1);
        assert_eq!(table.append(spike(2, 20), vec![]), 2);

        let numbers: Vec<(usize, usize)> = table
            .iter()
            .map(|s| (s.spike_number, s.sweep_spike_number))
            .collect();
        assert_eq!(numbers, vec![(0, 0), (1, 1), (2, 0)]);
        assert_eq!(table.sweep(2).count(), 1);
    }

    #[test]
    fn errors_are_keyed_by_spike() {
        let mut table = SpikeTable::new();
        let e = |detail: &str| {
            make_error(99, None, ErrorCategory::NotFound, Feature::HalfWidth, detail)
        };
        table.append(spike(0, 10), vec![e("a"), e("b")]);
        table.append(spike(0, 500), vec![]);
        table.append(spike(0, 900), vec![e("c")]);

        assert_eq!(table.errors().len(), 3);
        assert_eq!(table.errors_for(0).len(), 2);
        assert!(table.errors_for(1).is_empty());
        assert_eq!(table.errors_for(2)[0].spike_number, 2);
        assert_eq!(table.error_rows()[2]["detail"], Value::from("c"));
    }

    #[test]
    fn edits_are_whitelisted_and_stamped() {
        let mut table = SpikeTable::new();
        table.append(spike(0, 10), vec![]);
        assert!(table.get(0).unwrap().modified.is_none());

        table.edit(0, UserEdit::Include(false)).unwrap();
        table.edit(0, UserEdit::Condition("drug".to_string())).unwrap();
        let edited = table.get(0).unwrap();
        assert!(!edited.include);
        assert_eq!(edited.condition.as_deref(), Some("drug"));
        assert!(edited.modified.is_some());

        assert_eq!(
            table.edit(3, UserEdit::UserType(1)),
            Err(TableError::NoSuchSpike(3))
        );
    }

    #[test]
    fn columns_flatten_widths_and_null_nan() {
        let mut table = SpikeTable::new();
        let mut first = spike(0, 10);
        first.widths[0].width_ms = 1.5;
        first.widths[0].width_pnts = Some(15);
        table.append(first, vec![]);
        table.append(spike(0, 500), vec![]);

        let columns = table.columns();
        let column = |name: &str| {
            columns
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(column("thresholdPnt"), vec![Value::from(10), Value::from(500)]);
        assert_eq!(column("isiMs"), vec![Value::Null, Value::Null]);
        assert_eq!(column("widthMs_50"), vec![Value::from(1.5), Value::Null]);
        assert_eq!(column("widthPnts_50"), vec![Value::from(15), Value::Null]);
        assert_eq!(column("detectionType"), vec![Value::from("dvdt"); 2]);
        assert!(columns.iter().all(|(name, _)| name != "widths"));
    }

    #[test]
    fn empty_table_still_has_columns() {
        let columns = SpikeTable::new().columns();
        assert!(columns.iter().any(|(name, values)| name == "spikeNumber" && values.is_empty()));
    }
}
