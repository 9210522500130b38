//! Typed stored-query parameters: value types, coercion of bound values into
//! protocol-ready strings, and candidate values observed during expansion.

use crate::xml::XmlElement;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use std::fmt;
use thiserror::Error;

/// Time format of the provider's request parameters, e.g. `2020-11-02T15:00:00Z`.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const VARIABLE_PARAMETER: &str = "param";

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Parameter '{name}' has unsupported type '{type_name}'")]
    UnknownType { name: String, type_name: String },

    #[error("Parameter '{name}' expects a {expected} value, got {found}")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        found: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Double,
    Point,
    DateTime,
    Integer,
    Boolean,
    StringList,
    String,
    IntegerList,
    Rect,
    RectWithSrs,
}

impl ValueType {
    /// Maps a declared schema type (`xsi:dateTime`, `gml:pos`, `NameList`, ...)
    /// to a value type. Namespace prefixes are ignored.
    pub fn from_declared(declared: &str) -> Option<ValueType> {
        let local = declared.rsplit(':').next().unwrap_or(declared);
        let value_type = match local {
            "double" => ValueType::Double,
            "point" | "pos" => ValueType::Point,
            "dateTime" => ValueType::DateTime,
            "unsignedInteger" | "int" => ValueType::Integer,
            "boolean" => ValueType::Boolean,
            "NameList" => ValueType::StringList,
            "string" => ValueType::String,
            "integerList" => ValueType::IntegerList,
            _ => return None,
        };
        Some(value_type)
    }

    /// Best guess for a parameter discovered from a sample request, where only
    /// an observed value is known.
    pub fn infer(name: &str, sample: &str) -> ValueType {
        if name == "bbox" {
            ValueType::Rect
        } else if parse_datetime(sample).is_some() {
            ValueType::DateTime
        } else if sample.parse::<i64>().is_ok() {
            ValueType::Integer
        } else if sample.parse::<f64>().is_ok() {
            ValueType::Double
        } else {
            ValueType::String
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Double => "double",
            ValueType::Point => "point",
            ValueType::DateTime => "date time",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::StringList => "string list",
            ValueType::String => "string",
            ValueType::IntegerList => "integer list",
            ValueType::Rect => "bounding box",
            ValueType::RectWithSrs => "bounding box with srs",
        };
        write!(f, "{name}")
    }
}

/// A selectable variable of a `param` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterVariable {
    /// Lower-cased identifier as published by the provider.
    pub id: String,
    /// Identifier in its original case, usable in requests.
    pub alias: String,
    pub label: String,
}

/// Geographic bounding box, optionally tagged with its reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub srs: Option<String>,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
            srs: None,
        }
    }

    pub fn with_srs(mut self, srs: impl Into<String>) -> Self {
        self.srs = Some(srs.into());
        self
    }

    /// `minx,miny,maxx,maxy` rounded to two decimals.
    pub fn to_param_string(&self) -> String {
        let mut bbox = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .map(|c| format!("{:?}", round_coordinate(*c)))
            .collect::<Vec<_>>()
            .join(",");
        if let Some(srs) = &self.srs {
            bbox.push(',');
            bbox.push_str(srs);
        }
        bbox
    }
}

fn round_coordinate(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A raw value a caller binds to a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    DateTime(DateTime<Utc>),
    Rect(BoundingBox),
    List(Vec<String>),
    Text(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

impl ParameterValue {
    fn kind(&self) -> &'static str {
        match self {
            ParameterValue::DateTime(_) => "date time",
            ParameterValue::Rect(_) => "bounding box",
            ParameterValue::List(_) => "list",
            ParameterValue::Text(_) => "text",
            ParameterValue::Integer(_) => "integer",
            ParameterValue::Double(_) => "double",
            ParameterValue::Boolean(_) => "boolean",
        }
    }
}

impl From<DateTime<Utc>> for ParameterValue {
    fn from(value: DateTime<Utc>) -> Self {
        ParameterValue::DateTime(value)
    }
}

impl From<BoundingBox> for ParameterValue {
    fn from(value: BoundingBox) -> Self {
        ParameterValue::Rect(value)
    }
}

impl From<Vec<String>> for ParameterValue {
    fn from(value: Vec<String>) -> Self {
        ParameterValue::List(value)
    }
}

impl From<Vec<&str>> for ParameterValue {
    fn from(value: Vec<&str>) -> Self {
        ParameterValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Double(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Boolean(value)
    }
}

/// A candidate value observed for a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PossibleValue {
    Text(String),
    DateTime(DateTime<Utc>),
}

impl fmt::Display for PossibleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PossibleValue::Text(text) => write!(f, "{text}"),
            PossibleValue::DateTime(dt) => write!(f, "{}", dt.format(TIME_FORMAT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    pub name: String,
    pub title: String,
    pub abstract_text: String,
    pub value_type: ValueType,
    pub variables: Vec<ParameterVariable>,
    pub possible_values: Vec<PossibleValue>,
    value: Option<String>,
}

impl ParameterSchema {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            value_type,
            variables: Vec::new(),
            possible_values: Vec::new(),
            value: None,
        }
    }

    /// Builds a schema from a `<Parameter name=".." type="..">` element of a
    /// stored query description.
    pub fn create_from_xml(element: &XmlElement) -> Result<ParameterSchema, ParameterError> {
        let mut name = element.attr("name").unwrap_or_default().to_string();
        let declared = element.attr("type").unwrap_or_default();
        let title = element.child_text("Title").unwrap_or_default();
        let abstract_text = element.child_text("Abstract").unwrap_or_default();

        let value_type = if name == "bbox" {
            if abstract_text.contains("srs") {
                ValueType::RectWithSrs
            } else {
                ValueType::Rect
            }
        } else {
            ValueType::from_declared(declared).ok_or_else(|| ParameterError::UnknownType {
                name: name.clone(),
                type_name: declared.to_string(),
            })?
        };

        if name == "parameters" {
            name = VARIABLE_PARAMETER.to_string();
        }
        Ok(ParameterSchema::new(name, title, abstract_text, value_type))
    }

    /// Currently bound, protocol-ready value.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Binds a value, converting it to the form the request URI expects.
    pub fn set_value(&mut self, raw: impl Into<ParameterValue>) -> Result<(), ParameterError> {
        let raw = raw.into();
        let converted = match (self.value_type, raw) {
            (ValueType::DateTime, ParameterValue::DateTime(dt)) => {
                round_datetime(dt).format(TIME_FORMAT).to_string()
            }
            (ValueType::DateTime, other) => return Err(self.mismatch(&other)),
            (ValueType::Rect | ValueType::RectWithSrs, ParameterValue::Rect(bbox)) => {
                bbox.to_param_string()
            }
            (ValueType::Rect | ValueType::RectWithSrs, other) => return Err(self.mismatch(&other)),
            (_, ParameterValue::List(values)) => values.join(","),
            (_, ParameterValue::Rect(bbox)) => bbox.to_param_string(),
            (_, ParameterValue::DateTime(dt)) => round_datetime(dt).format(TIME_FORMAT).to_string(),
            (_, ParameterValue::Text(text)) => text,
            (_, ParameterValue::Integer(i)) => i.to_string(),
            (_, ParameterValue::Double(d)) => d.to_string(),
            (_, ParameterValue::Boolean(b)) => b.to_string(),
        };
        self.value = Some(converted).filter(|v| !v.is_empty());
        Ok(())
    }

    pub fn clear_value(&mut self) {
        self.value = None;
    }

    fn mismatch(&self, found: &ParameterValue) -> ParameterError {
        ParameterError::TypeMismatch {
            name: self.name.clone(),
            expected: self.value_type,
            found: found.kind(),
        }
    }

    pub fn has_variable_list(&self) -> bool {
        self.name == VARIABLE_PARAMETER && self.value_type == ValueType::StringList
    }

    /// Fills `variables` from an observed-property document fetched from
    /// `observed_property_url`.
    ///
    /// Published identifiers are lower-cased; the original spelling is looked up
    /// from the url, which keeps the case the provider expects in requests.
    pub fn populate_variables(
        &mut self,
        observed_property_url: &str,
        document: &XmlElement,
    ) {
        let url_lower = observed_property_url.to_ascii_lowercase();
        self.variables = document
            .children_named("component")
            .filter_map(|component| component.child("ObservableProperty"))
            .map(|property| {
                let id = property
                    .attr("id")
                    .or_else(|| property.first_attr_value())
                    .unwrap_or_default()
                    .to_string();
                let label = property.child_text("label").unwrap_or_default().to_string();
                let alias = match url_lower.find(&id) {
                    Some(idx) if !id.is_empty() => {
                        observed_property_url[idx..idx + id.len()].to_string()
                    }
                    _ => id.clone(),
                };
                ParameterVariable { id, alias, label }
            })
            .collect();
    }

    /// Records an observed candidate value, once.
    pub fn add_possible_value(&mut self, raw: &str) {
        let value = match self.value_type {
            ValueType::DateTime => parse_datetime(raw)
                .map(PossibleValue::DateTime)
                .unwrap_or_else(|| PossibleValue::Text(raw.to_string())),
            _ => PossibleValue::Text(raw.to_string()),
        };
        if !self.possible_values.contains(&value) {
            self.possible_values.push(value);
        }
    }

    /// Earliest and latest observed date time candidates.
    pub fn datetime_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut times = self.possible_values.iter().filter_map(|v| match v {
            PossibleValue::DateTime(dt) => Some(*dt),
            PossibleValue::Text(_) => None,
        });
        let first = times.next()?;
        Some(times.fold((first, first), |(min, max), dt| (min.min(dt), max.max(dt))))
    }
}

/// Rounds to the nearest ten minutes (ties up) and drops seconds.
pub fn round_datetime(dt: DateTime<Utc>) -> DateTime<Utc> {
    let shifted = dt + TimeDelta::minutes(5);
    let truncated = shifted
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(shifted);
    truncated - TimeDelta::minutes(i64::from(truncated.minute() % 10))
}

pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}
