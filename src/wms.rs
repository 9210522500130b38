//! WMS layers of the FMI map service, registered as provider-driven
//! temporal layers.

use crate::error::LoaderError;
use crate::layers::{LayerDescriptor, LayerKind, LayerRegistry, TemporalSettings};
use crate::network::client::Network;
use crate::network::error::NetworkError;
use crate::settings::Settings;
use crate::xml::{XmlElement, XmlError};
use bon::bon;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Time format of WMS time dimension extents.
pub const WMS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const DEFAULT_CRS: &str = "EPSG:4326";
const WMS_PROVIDER: &str = "wms";

#[derive(Debug, Error)]
pub enum WmsError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Failed to parse capabilities")]
    Xml(#[from] XmlError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WmsLayer {
    pub name: String,
    pub title: String,
    pub abstract_text: String,
    pub elevations: Vec<f64>,
    pub default_elevation: Option<f64>,
    pub elevation_unit: Option<String>,
    pub elevation_unit_symbol: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub t_step: Option<u32>,
    /// Unit letter of the ISO 8601 step, e.g. `M` in `PT5M`.
    pub time_step_uom: Option<char>,
}

impl WmsLayer {
    /// Parses a `<Layer>` element. Layers without a title are not offered.
    pub fn create_from_xml(element: &XmlElement) -> Option<WmsLayer> {
        let mut layer = WmsLayer {
            name: element.child_text("Name").unwrap_or_default().to_string(),
            title: element.child_text("Title").unwrap_or_default().to_string(),
            abstract_text: element.child_text("Abstract").unwrap_or_default().to_string(),
            ..Default::default()
        };
        if layer.title.is_empty() {
            return None;
        }

        for dimension in element.children_named("Dimension") {
            match dimension.attr("name") {
                Some("time") => layer.read_time_dimension(dimension),
                Some("elevation") => layer.read_elevation_dimension(dimension),
                _ => {}
            }
        }
        Some(layer)
    }

    /// `<start>/<end>/<ISO 8601 duration>`
    fn read_time_dimension(&mut self, dimension: &XmlElement) {
        let extent = dimension.text.trim();
        let parsed = match extent.split('/').collect::<Vec<_>>().as_slice() {
            [start, end, step] => parse_wms_time(start)
                .zip(parse_wms_time(end))
                .zip(parse_step(step)),
            _ => None,
        };
        match parsed {
            Some(((start, end), (step, uom))) => {
                self.start_time = Some(start);
                self.end_time = Some(end);
                self.t_step = Some(step);
                self.time_step_uom = Some(uom);
            }
            None => warn!("Ignoring time dimension '{}' of layer {}", extent, self.name),
        }
    }

    fn read_elevation_dimension(&mut self, dimension: &XmlElement) {
        let elevations: Result<Vec<f64>, _> = dimension
            .text
            .split(',')
            .map(|e| e.trim().parse::<f64>())
            .collect();
        let Ok(elevations) = elevations else {
            warn!("Ignoring elevation dimension of layer {}", self.name);
            return;
        };
        self.default_elevation = dimension
            .attr("default")
            .and_then(|d| d.parse().ok())
            .or_else(|| elevations.first().copied());
        self.elevation_unit = dimension.attr("units").map(str::to_string);
        self.elevation_unit_symbol = dimension.attr("unitSymbol").map(str::to_string);
        self.elevations = elevations;
    }

    pub fn is_temporal(&self) -> bool {
        self.start_time.is_some()
            && self.end_time.is_some()
            && self.t_step.is_some()
            && self.time_step_uom.is_some()
    }

    pub fn has_elevation(&self) -> bool {
        !self.elevations.is_empty() && self.default_elevation.is_some()
    }
}

impl fmt::Display for WmsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn parse_wms_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// `PT5M` -> `(5, 'M')`, `P1D` -> `(1, 'D')`
fn parse_step(raw: &str) -> Option<(u32, char)> {
    let step = raw.trim().trim_start_matches('P').trim_start_matches('T');
    let uom = step.chars().last()?;
    let magnitude = step[..step.len() - uom.len_utf8()].parse().ok()?;
    Some((magnitude, uom))
}

/// Collects the sub layers of the root layer of a capabilities document.
pub fn parse_capabilities(content: &str) -> Result<Vec<WmsLayer>, XmlError> {
    let root = XmlElement::parse(content)?;
    let base = root.require_child("Capability")?.require_child("Layer")?;
    Ok(base
        .children_named("Layer")
        .filter_map(WmsLayer::create_from_xml)
        .collect())
}

pub struct CapabilitiesLayerCatalog {
    wms_url: String,
    network: Arc<dyn Network>,
}

#[bon]
impl CapabilitiesLayerCatalog {
    pub fn new(settings: &Settings, network: Arc<dyn Network>) -> Self {
        Self {
            wms_url: settings.wms_url.clone(),
            network,
        }
    }

    pub fn capabilities_url(&self) -> String {
        format!("{}?request=GetCapabilities", self.wms_url)
    }

    pub async fn list_layers(&self) -> Result<Vec<WmsLayer>, WmsError> {
        let content = self.network.fetch(&self.capabilities_url()).await?;
        let layers = parse_capabilities(&content)?;
        info!("Found {} WMS layers", layers.len());
        Ok(layers)
    }

    /// Data source URI of `layer` for a WMS provider.
    ///
    /// Start and end default to the layer's own time extent. An elevation
    /// that the layer does not offer is ignored.
    ///
    /// # Errors
    ///
    /// [`LoaderError::InvalidParameter`] if the end time is before the start time.
    #[builder]
    pub fn build_render_uri(
        &self,
        layer: &WmsLayer,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        elevation: Option<f64>,
        crs: Option<&str>,
    ) -> Result<String, LoaderError> {
        let mut uri = format!(
            "url={}?request%3DGetCapabilities&layers={}&dpiMode=7&format=image/png&styles&crs={}",
            self.wms_url,
            layer.name,
            crs.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_CRS)
        );

        if let (Some(layer_start), Some(layer_end), Some(step), Some(uom)) =
            (layer.start_time, layer.end_time, layer.t_step, layer.time_step_uom)
        {
            let start = start_time.unwrap_or(layer_start);
            let end = end_time.unwrap_or(layer_end);
            if end < start {
                return Err(LoaderError::InvalidParameter(
                    "End time is before start time".to_string(),
                ));
            }
            uri.push_str(&format!(
                "&allowTemporalUpdates=true&type=wmst&temporalSource=provider\
                 &timeDimensionExtent={}/{}/PT{step}{uom}",
                start.format(WMS_TIME_FORMAT),
                end.format(WMS_TIME_FORMAT),
            ));
        }

        if let Some(elevation) = elevation.filter(|_| layer.has_elevation()) {
            if layer.elevations.contains(&elevation) {
                uri.push_str(&format!("&elevation={elevation:?}"));
            } else {
                warn!("Invalid elevation {} for layer {}", elevation, layer);
            }
        }
        Ok(uri)
    }

    /// Registers `layer` with `registry` and returns the new layer id.
    #[builder]
    pub fn add_to_map(
        &self,
        registry: &mut dyn LayerRegistry,
        layer: &WmsLayer,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        elevation: Option<f64>,
        crs: Option<&str>,
    ) -> Result<String, LoaderError> {
        let uri = self
            .build_render_uri()
            .layer(layer)
            .maybe_start_time(start_time)
            .maybe_end_time(end_time)
            .maybe_elevation(elevation)
            .maybe_crs(crs)
            .call()?;
        let mut descriptor = LayerDescriptor::new(layer.name.as_str(), uri, LayerKind::Wms, WMS_PROVIDER);
        if layer.is_temporal() {
            descriptor = descriptor.with_temporal(TemporalSettings::ProviderActive);
        }
        let id = registry.add_layer(&descriptor);
        info!("Added WMS layer \"{}\" as {}", layer.name, id);
        Ok(id)
    }
}
