use crate::wfs::parameter::{ParameterError, ParameterSchema, ValueType};
use crate::xml::XmlElement;
use std::fmt;

const TIME_STEP_NAMES: [&str; 2] = ["timestep", "time_step"];
const DEFAULT_TIME_STEP_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Raster,
    Vector,
}

impl QueryKind {
    /// Classifies a stored query id. `None` means the query is not supported.
    pub fn classify(id: &str) -> Option<QueryKind> {
        if id.ends_with("grid") {
            Some(QueryKind::Raster)
        } else if id.ends_with("iwxxm") || id.ends_with("GetFeatureById") {
            None
        } else {
            Some(QueryKind::Vector)
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Raster => write!(f, "raster"),
            QueryKind::Vector => write!(f, "vector"),
        }
    }
}

/// Parameters of a stored query, keyed by name and kept in declaration order.
///
/// Expansion adds entries the static description does not declare, so this is
/// an open mapping rather than a fixed set of fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: Vec<ParameterSchema>,
}

impl Parameters {
    pub fn get(&self, name: &str) -> Option<&ParameterSchema> {
        self.entries.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ParameterSchema> {
        self.entries.iter_mut().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Inserts a parameter, replacing one with the same name in place.
    pub fn insert(&mut self, parameter: ParameterSchema) {
        match self.get_mut(&parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.entries.push(parameter),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSchema> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ParameterSchema> {
        self.entries.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, value)` pairs of every bound parameter, in order.
    pub fn bound(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|p| p.value().map(|v| (p.name.as_str(), v)))
    }
}

impl FromIterator<ParameterSchema> for Parameters {
    fn from_iter<I: IntoIterator<Item = ParameterSchema>>(iter: I) -> Self {
        let mut parameters = Parameters::default();
        for parameter in iter {
            parameters.insert(parameter);
        }
        parameters
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredQuery {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub kind: QueryKind,
    pub parameters: Parameters,
    /// Known after expansion.
    pub producer: String,
    /// Known after expansion.
    pub format: String,
}

impl StoredQuery {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
        kind: QueryKind,
        parameters: Parameters,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            kind,
            parameters,
            producer: String::new(),
            format: String::new(),
        }
    }

    /// Builds a query from a `<StoredQueryDescription>` element.
    ///
    /// Returns `Ok(None)` for query kinds that are not supported.
    pub fn create_from_xml(element: &XmlElement) -> Result<Option<StoredQuery>, ParameterError> {
        let id = element.attr("id").unwrap_or_default();
        let Some(kind) = QueryKind::classify(id) else {
            return Ok(None);
        };

        let parameters = element
            .children_named("Parameter")
            .map(ParameterSchema::create_from_xml)
            .collect::<Result<Parameters, _>>()?;

        Ok(Some(StoredQuery::new(
            id,
            element.child_text("Title").unwrap_or_default(),
            element.child_text("Abstract").unwrap_or_default(),
            kind,
            parameters,
        )))
    }

    pub fn is_expanded(&self) -> bool {
        !self.producer.is_empty()
    }

    /// Bound time step in minutes, or 60 when none is bound.
    pub fn time_step_minutes(&self) -> i64 {
        let mut candidates = self
            .parameters
            .iter()
            .filter(|p| TIME_STEP_NAMES.contains(&p.name.as_str()));
        match (candidates.next(), candidates.next()) {
            (Some(parameter), None) => parameter
                .value()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIME_STEP_MINUTES),
            _ => DEFAULT_TIME_STEP_MINUTES,
        }
    }

    /// The list parameter holding the requested variables, if the query has one.
    pub fn variable_parameter(&self) -> Option<&ParameterSchema> {
        self.parameters.iter().find(|p| p.has_variable_list())
    }

    /// Variables bound to the variable list parameter, in request order.
    pub fn bound_variables(&self) -> Vec<String> {
        self.variable_parameter()
            .and_then(|p| p.value())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bound start time parameter: `starttime`, or the first bound date time
    /// parameter whose name starts with "start".
    pub fn bound_start_time(&self) -> Option<&str> {
        self.parameters
            .get("starttime")
            .and_then(|p| p.value())
            .or_else(|| {
                self.parameters
                    .iter()
                    .filter(|p| p.value_type == ValueType::DateTime && p.name.starts_with("start"))
                    .find_map(|p| p.value())
            })
    }
}
