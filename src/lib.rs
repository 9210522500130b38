mod engine;
mod error;
mod layers;
mod metadata;
mod network;
mod products;
mod settings;
mod tasks;
mod utils;
mod wfs;
mod wms;
mod xml;

#[cfg(test)]
mod testing;

pub use error::LoaderError;
pub use settings::*;
pub use utils::default_download_dir;

pub use network::client::{HttpClient, Network};
pub use network::error::NetworkError;
pub use xml::{XmlElement, XmlError};

pub use wfs::catalog::*;
pub use wfs::error::CatalogError;
pub use wfs::exception::fault_from_response;
pub use wfs::parameter::*;
pub use wfs::stored_query::*;

pub use engine::gdal_engine::GdalEngine;
pub use engine::*;

pub use layers::*;
pub use metadata::*;

pub use tasks::mesh::{MeshLayers, MeshProcessor};
pub use tasks::raster::{RasterLayers, RasterProcessor, RasterUri};
pub use tasks::task::*;
pub use tasks::vector::{VectorLayers, VectorProcessor, VectorUri};

pub use products::enfuser::*;
pub use wms::*;
