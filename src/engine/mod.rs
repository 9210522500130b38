//! The raster/vector format engine the download tasks post-process files with.
//!
//! The engine is blocking; tasks call it from `spawn_blocking` workers.

pub mod gdal_engine;

use gdal::errors::GdalError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A flat metadata dictionary of a dataset or band.
pub type MetadataMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to open '{uri}'")]
    Open {
        uri: String,
        #[source]
        source: GdalError,
    },

    #[error("GDAL driver '{0}' is not available")]
    MissingDriver(String, #[source] GdalError),

    #[error("Failed to write '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: GdalError,
    },

    #[error("Failed to convert '{src}': {message}")]
    VectorTranslate { src: PathBuf, message: String },
}

/// A named sub-resource of a raster file, e.g. one variable of a NetCDF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDataset {
    /// Engine URI, e.g. `NETCDF:"/tmp/aq.nc":index_of_airquality_194`.
    pub uri: String,
    pub description: String,
}

impl SubDataset {
    pub fn new(uri: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            description: description.into(),
        }
    }

    /// Variable part of the URI: the text after the last `:`, unquoted.
    pub fn variable_name(&self) -> String {
        self.uri
            .rsplit(':')
            .next()
            .unwrap_or_default()
            .trim_matches('"')
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Integer64,
    Real,
    String,
    Date,
    Time,
    DateTime,
    Binary,
    List(String),
    Other(String),
}

impl FieldType {
    /// Whether the engine stores the field with a native temporal type.
    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Time | FieldType::DateTime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorLayerInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
}

/// Layout of an opened vector data source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorSource {
    pub layers: Vec<VectorLayerInfo>,
}

/// Options of a vector format conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorTranslate {
    pub format: String,
    pub creation_options: Vec<String>,
    pub options: Vec<String>,
    pub sql: Option<String>,
}

pub trait FormatEngine: Send + Sync {
    fn sub_datasets(&self, uri: &str) -> Result<Vec<SubDataset>, EngineError>;

    /// Dataset level metadata of the default domain.
    fn metadata(&self, uri: &str) -> Result<MetadataMap, EngineError>;

    /// Metadata of a 1-based band.
    fn band_metadata(&self, uri: &str, band: u32) -> Result<MetadataMap, EngineError>;

    /// Writes a NetCDF copy of `src_uri` to `dst` with `metadata` set on it.
    fn translate_raster(
        &self,
        src_uri: &str,
        dst: &Path,
        metadata: &MetadataMap,
    ) -> Result<(), EngineError>;

    fn has_vector_driver(&self, name: &str) -> Result<bool, EngineError>;

    fn open_vector(&self, path: &Path) -> Result<VectorSource, EngineError>;

    /// Converts `src` into `dst` and returns the layout of the result.
    fn translate_vector(
        &self,
        src: &Path,
        dst: &Path,
        request: &VectorTranslate,
    ) -> Result<VectorSource, EngineError>;
}
