//! Renderable layer descriptors and the project they are registered with.

use crate::metadata::TimeRange;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Raster,
    Mesh,
    Vector,
    Wms,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerKind::Raster => "raster",
            LayerKind::Mesh => "mesh",
            LayerKind::Vector => "vector",
            LayerKind::Wms => "wms",
        };
        write!(f, "{name}")
    }
}

/// How a layer moves along the host's time axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalSettings {
    /// Valid over a fixed range derived from the file's time axis.
    FixedRange(TimeRange),
    /// The data provider knows the time axis itself.
    ProviderActive,
    /// Feature times come from `field`, one frame per `step_minutes`.
    Field { field: String, step_minutes: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub name: String,
    /// Data source URI understood by `provider`.
    pub uri: String,
    pub kind: LayerKind,
    pub provider: String,
    /// Band to render with a single band renderer.
    pub render_band: Option<u32>,
    pub temporal: Option<TemporalSettings>,
}

impl LayerDescriptor {
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        kind: LayerKind,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            kind,
            provider: provider.into(),
            render_band: None,
            temporal: None,
        }
    }

    pub fn with_temporal(mut self, temporal: TemporalSettings) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn with_render_band(mut self, band: u32) -> Self {
        self.render_band = Some(band);
        self
    }

    pub fn is_temporal(&self) -> bool {
        self.temporal.is_some()
    }
}

/// The host project layers are added to.
pub trait LayerRegistry {
    /// Adds a layer and returns its identifier.
    fn add_layer(&mut self, layer: &LayerDescriptor) -> String;

    fn set_fixed_temporal_range(&mut self, id: &str, range: TimeRange);

    fn set_single_band(&mut self, id: &str, band: u32);

    fn is_registered(&self, id: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredLayer {
    pub id: String,
    pub layer: LayerDescriptor,
    pub fixed_range: Option<TimeRange>,
    pub single_band: Option<u32>,
}

/// In-memory project for headless use.
#[derive(Debug, Default)]
pub struct MemoryProject {
    layers: Vec<RegisteredLayer>,
}

impl MemoryProject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layers(&self) -> &[RegisteredLayer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&RegisteredLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layers_by_name(&self, name: &str) -> Vec<&RegisteredLayer> {
        self.layers.iter().filter(|l| l.layer.name == name).collect()
    }

    pub fn remove_layer(&mut self, id: &str) -> Option<RegisteredLayer> {
        let idx = self.layers.iter().position(|l| l.id == id)?;
        Some(self.layers.remove(idx))
    }

    fn layer_mut(&mut self, id: &str) -> Option<&mut RegisteredLayer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }
}

impl LayerRegistry for MemoryProject {
    fn add_layer(&mut self, layer: &LayerDescriptor) -> String {
        let id = format!("{}_{}", layer.name, Uuid::new_v4().simple());
        self.layers.push(RegisteredLayer {
            id: id.clone(),
            layer: layer.clone(),
            fixed_range: None,
            single_band: None,
        });
        id
    }

    fn set_fixed_temporal_range(&mut self, id: &str, range: TimeRange) {
        if let Some(registered) = self.layer_mut(id) {
            registered.fixed_range = Some(range);
        }
    }

    fn set_single_band(&mut self, id: &str, band: u32) {
        if let Some(registered) = self.layer_mut(id) {
            registered.single_band = Some(band);
        }
    }

    fn is_registered(&self, id: &str) -> bool {
        self.layer(id).is_some()
    }
}
