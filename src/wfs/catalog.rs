//! Discovery of the WFS service's stored queries and their dynamic parameters.

use crate::network::client::Network;
use crate::settings::Settings;
use crate::wfs::error::CatalogError;
use crate::wfs::parameter::{ParameterSchema, PossibleValue, ValueType};
use crate::wfs::stored_query::{QueryKind, StoredQuery};
use crate::xml::XmlElement;
use bon::bon;
use log::{debug, info, warn};
use std::sync::Arc;
use url::Url;

const STORED_QUERY_DESCRIPTION: &str = "StoredQueryDescription";
/// File reference arguments that are fixed by the query itself.
const NON_DISCOVERABLE: [&str; 3] = ["producer", "origintime", "param"];
const REQUIRED_FORMAT: &str = "netcdf";

/// Result of parsing a `describeStoredQueries` document.
#[derive(Debug, Default)]
pub struct QueryListing {
    pub queries: Vec<StoredQuery>,
    /// Queries left out because one of their parameters has an unknown type.
    pub unsupported: Vec<CatalogError>,
}

/// What a one-feature sample request reveals about a grid query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleResponse {
    pub observed_property_url: Option<String>,
    pub procedure_url: Option<String>,
    pub file_references: Vec<String>,
}

impl SampleResponse {
    pub fn from_xml(root: &XmlElement, query_id: &str) -> Result<SampleResponse, CatalogError> {
        let observation = root
            .children_named("member")
            .next()
            .and_then(|member| member.children.first())
            .ok_or_else(|| CatalogError::EmptySample(query_id.to_string()))?;

        let observed_property_url = observation
            .child("observedProperty")
            .and_then(|e| e.attr("href").or_else(|| e.first_attr_value()))
            .map(str::to_string);
        let procedure_url = observation
            .child("procedure")
            .and_then(|e| e.attr("href").or_else(|| e.first_attr_value()))
            .map(str::to_string);
        let file_references = root
            .descendants_named("fileReference")
            .into_iter()
            .map(|e| e.text.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        Ok(SampleResponse {
            observed_property_url,
            procedure_url,
            file_references,
        })
    }
}

pub struct StoredQueryCatalog {
    wfs_url: String,
    wfs_version: String,
    sample_count: u32,
    network: Arc<dyn Network>,
}

#[bon]
impl StoredQueryCatalog {
    /// Creates a catalog for the WFS service configured in `settings`.
    ///
    /// `sample_count` is the number of features requested when expanding a
    /// query. It defaults to, and is clamped to at least, one.
    #[builder]
    pub fn new(settings: &Settings, network: Arc<dyn Network>, sample_count: Option<u32>) -> Self {
        Self {
            wfs_url: settings.wfs_url.clone(),
            wfs_version: settings.wfs_version.clone(),
            sample_count: sample_count.unwrap_or(1).max(1),
            network,
        }
    }

    pub fn describe_stored_queries_url(&self) -> String {
        format!(
            "{}?service=WFS&version={}&request=describeStoredQueries",
            self.wfs_url, self.wfs_version
        )
    }

    pub fn get_feature_url(&self, query_id: &str, count: u32) -> String {
        format!(
            "{}?service=WFS&version={}&request=GetFeature&count={}&storedquery_id={}",
            self.wfs_url, self.wfs_version, count, query_id
        )
    }

    /// Lists every supported stored query of the service.
    pub async fn list_queries(&self) -> Result<Vec<StoredQuery>, CatalogError> {
        let content = self
            .network
            .fetch(&self.describe_stored_queries_url())
            .await?;
        let listing = parse_stored_queries(&content)?;
        for unsupported in &listing.unsupported {
            warn!("Skipping stored query: {}", unsupported);
        }
        info!("Found {} supported stored queries", listing.queries.len());
        Ok(listing.queries)
    }

    /// Discovers producer, format, variables and dynamic parameters of a raster
    /// query by requesting a sample feature. Vector queries are left untouched.
    pub async fn expand(&self, query: &mut StoredQuery) -> Result<(), CatalogError> {
        if query.kind != QueryKind::Raster {
            return Ok(());
        }

        let content = self
            .network
            .fetch(&self.get_feature_url(&query.id, self.sample_count))
            .await?;
        let root = XmlElement::parse(&content)?;
        let sample = SampleResponse::from_xml(&root, &query.id)?;

        if let Some(url) = &sample.observed_property_url {
            if query.variable_parameter().is_some() {
                let document = XmlElement::parse(&self.network.fetch(url).await?)?;
                for parameter in query.parameters.iter_mut().filter(|p| p.has_variable_list()) {
                    parameter.populate_variables(url, &document);
                }
            }
        }

        apply_sample(query, &sample);
        debug!(
            "Expanded {}: producer={}, format={}, {} parameters",
            query.id,
            query.producer,
            query.format,
            query.parameters.len()
        );
        Ok(())
    }
}

pub fn parse_stored_queries(content: &str) -> Result<QueryListing, CatalogError> {
    let root = XmlElement::parse(content)?;
    let mut listing = QueryListing::default();
    for element in root.children_named(STORED_QUERY_DESCRIPTION) {
        match StoredQuery::create_from_xml(element) {
            Ok(Some(query)) => listing.queries.push(query),
            Ok(None) => {}
            Err(source) => listing.unsupported.push(CatalogError::UnsupportedParameter {
                query: element.attr("id").unwrap_or_default().to_string(),
                source,
            }),
        }
    }
    Ok(listing)
}

/// Folds what a sample response revealed into `query`.
pub fn apply_sample(query: &mut StoredQuery, sample: &SampleResponse) {
    if let Some(procedure) = &sample.procedure_url {
        query.producer = procedure
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
    }
    if let Some(observed) = &sample.observed_property_url {
        query.format = query_argument(observed, "units").unwrap_or_default();
    }

    for reference in &sample.file_references {
        let Ok(url) = Url::parse(reference) else {
            warn!("Ignoring unparsable file reference {}", reference);
            continue;
        };
        let arguments: Vec<(String, String)> = url
            .query_pairs()
            .into_owned()
            .filter(|(name, _)| !NON_DISCOVERABLE.contains(&name.as_str()))
            .collect();

        for (name, value) in &arguments {
            if !query.parameters.contains(name) {
                let value_type = ValueType::infer(name, value);
                query
                    .parameters
                    .insert(ParameterSchema::new(name.as_str(), name.as_str(), "", value_type));
            }
            if let Some(parameter) = query.parameters.get_mut(name) {
                parameter.add_possible_value(value);
            }
        }

        // Keep start and end pickers choosing from the same set of times.
        for (name, value) in &arguments {
            let is_range_bound = name.starts_with("start") || name.starts_with("end");
            let is_datetime = query
                .parameters
                .get(name)
                .is_some_and(|p| p.value_type == ValueType::DateTime);
            if !(is_range_bound && is_datetime) {
                continue;
            }
            for other in query
                .parameters
                .iter_mut()
                .filter(|p| p.name != *name && p.value_type == ValueType::DateTime)
            {
                other.add_possible_value(value);
            }
        }
    }

    // The raster pipeline only handles NetCDF, so it must always be selectable.
    if let Some(format) = query.parameters.get_mut("format") {
        let other_format_seen = format
            .possible_values
            .iter()
            .any(|v| !matches!(v, PossibleValue::Text(t) if t == REQUIRED_FORMAT));
        if other_format_seen {
            format.add_possible_value(REQUIRED_FORMAT);
        }
    }
}

fn query_argument(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
