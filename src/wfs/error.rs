use crate::network::error::NetworkError;
use crate::wfs::parameter::ParameterError;
use crate::xml::XmlError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Failed to parse service response")]
    Xml(#[from] XmlError),

    #[error("Stored query '{query}' is not supported: {source}")]
    UnsupportedParameter {
        query: String,
        #[source]
        source: ParameterError,
    },

    #[error("Sample response for stored query '{0}' contains no members")]
    EmptySample(String),
}
