//! Temporal and structural metadata derived from downloaded files.

use crate::engine::{MetadataMap, VectorSource};
use crate::wfs::parameter::parse_datetime;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use log::{debug, warn};

const NETCDF_DIM_EXTRA: &str = "NETCDF_DIM_EXTRA";
/// Time format of NetCDF `units` attributes, e.g. `hours since 2020-11-02 15:00:00`.
const UNITS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_DIMENSION: &str = "time";

/// Non-standard time dimension names seen in provider files, all of which
/// mean [`TIME_DIMENSION`].
pub const TIME_DIMENSION_QUIRKS: [&str; 11] = [
    "time_h", "time_0h", "time_1h", "time_2h", "time_3h", "time_4h", "time_5h", "time_6h",
    "time_7h", "time_8h", "time_9h",
];

const DATETIME_FIELDS: [&str; 3] = ["date", "time", "datetime"];

/// Closed time interval a layer is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

/// A raster variable and the engine URI of its sub-dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDatasetEntry {
    pub variable: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetMetadata {
    // Raster
    pub start_time: Option<DateTime<Utc>>,
    pub time_step: Option<TimeDelta>,
    pub num_steps: Option<u32>,
    pub sub_datasets: Option<Vec<SubDatasetEntry>>,

    // Vector
    pub layer_name: String,
    pub fields: Option<Vec<String>>,
    pub time_field_index: Option<usize>,
}

impl DatasetMetadata {
    pub fn is_temporal(&self) -> bool {
        self.start_time.is_some()
            && self.time_step.is_some()
            && self.num_steps.is_some_and(|n| n > 0)
    }

    /// Time range covered by the raster time axis. The end is pushed one second
    /// past the last step so that the last frame stays selectable.
    ///
    /// `None` when the axis is incomplete or its end is not representable.
    pub fn time_range(&self) -> Option<TimeRange> {
        let (start, step, steps) = match (self.start_time, self.time_step, self.num_steps) {
            (Some(start), Some(step), Some(steps)) if steps > 0 => (start, step, steps),
            _ => return None,
        };
        let end = i32::try_from(steps - 1)
            .ok()
            .and_then(|n| step.checked_mul(n))
            .and_then(|span| span.checked_add(&TimeDelta::seconds(1)))
            .and_then(|span| start.checked_add_signed(span));
        match end {
            Some(end) => Some(TimeRange::new(start, end)),
            None => {
                warn!("Time axis of {} steps from {} overflows", steps, start);
                None
            }
        }
    }

    /// Lower-cased name of the field that holds feature times.
    pub fn temporal_field(&self) -> Option<String> {
        let fields = self.fields.as_ref()?;
        fields.get(self.time_field_index?).map(|f| f.to_lowercase())
    }

    /// Reads the time axis from NetCDF dimension metadata.
    pub fn update_from_raster_metadata(&mut self, metadata: &MetadataMap) {
        let Some(extra) = metadata.get(NETCDF_DIM_EXTRA) else {
            return;
        };
        for dimension in strip_braces(extra).split(',').map(str::trim) {
            if !is_time_dimension(dimension) {
                continue;
            }
            let definition = metadata
                .get(&format!("NETCDF_DIM_{dimension}_DEF"))
                .map(|d| strip_braces(d).to_string())
                .unwrap_or_default();
            let Some(count) = definition
                .split(',')
                .next()
                .and_then(|c| c.trim().parse::<u32>().ok())
            else {
                continue;
            };
            let units = metadata
                .get(&format!("{dimension}#units"))
                .map(String::as_str)
                .unwrap_or_default();
            let Some((unit, start)) = units.split_once(" since ") else {
                warn!("Time dimension '{}' has no usable units: '{}'", dimension, units);
                continue;
            };

            self.time_step = match unit.trim() {
                "hours" => Some(TimeDelta::hours(1)),
                "minutes" => Some(TimeDelta::minutes(1)),
                "days" => Some(TimeDelta::days(1)),
                other => {
                    warn!("Unsupported time unit '{}'", other);
                    None
                }
            };
            self.start_time = parse_units_start(start.trim());
            self.num_steps = Some(count);
            debug!(
                "Time axis: start={:?}, step={:?}, steps={}",
                self.start_time, self.time_step, count
            );
        }
    }

    /// Reads the layer layout of a single-layer vector source and finds the
    /// first date/time field that the format stored as text.
    pub fn update_from_vector_source(&mut self, source: &VectorSource) {
        let [layer] = source.layers.as_slice() else {
            warn!(
                "Vector source has {} layers, only single layer sources are supported",
                source.layers.len()
            );
            return;
        };

        self.layer_name = layer.name.clone();
        self.time_field_index = layer.fields.iter().position(|field| {
            DATETIME_FIELDS.contains(&field.name.to_lowercase().as_str())
                && !field.field_type.is_temporal()
        });
        self.fields = Some(layer.fields.iter().map(|f| f.name.clone()).collect());
    }

    /// Whether the designated time field of `source` has a native temporal type.
    pub fn is_datasource_valid(&self, source: &VectorSource) -> bool {
        let (Some(temporal_field), [layer]) = (self.temporal_field(), source.layers.as_slice())
        else {
            return false;
        };
        layer
            .fields
            .iter()
            .find(|field| field.name.to_lowercase() == temporal_field)
            .is_some_and(|field| field.field_type.is_temporal())
    }
}

/// Rewrites quirky time dimension names in metadata keys and values to `time`.
pub fn fix_dimension_naming(metadata: &MetadataMap) -> MetadataMap {
    metadata
        .iter()
        .map(|(key, value)| (canonical_time_names(key), canonical_time_names(value)))
        .collect()
}

fn canonical_time_names(text: &str) -> String {
    TIME_DIMENSION_QUIRKS
        .iter()
        .fold(text.to_string(), |text, quirk| {
            replace_token(&text, quirk, TIME_DIMENSION)
        })
}

/// Replaces `token` where it is not part of a longer alphanumeric word.
fn replace_token(text: &str, token: &str, replacement: &str) -> String {
    let mut replaced = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in text.match_indices(token) {
        let end = idx + token.len();
        let starts_word = text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        let ends_word = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        if starts_word && ends_word {
            replaced.push_str(&text[last..idx]);
            replaced.push_str(replacement);
            last = end;
        }
    }
    replaced.push_str(&text[last..]);
    replaced
}

fn is_time_dimension(name: &str) -> bool {
    name == TIME_DIMENSION || TIME_DIMENSION_QUIRKS.contains(&name)
}

fn strip_braces(value: &str) -> &str {
    value.trim().trim_start_matches('{').trim_end_matches('}')
}

fn parse_units_start(start: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(start, UNITS_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| parse_datetime(start))
}
