use crate::engine::EngineError;
use crate::network::error::NetworkError;
use crate::wfs::exception::fault_from_body;
use crate::wfs::parameter::ParameterError;
use crate::xml::XmlError;
use std::path::PathBuf;
use thiserror::Error;

const BAD_REQUEST_MARKER: &str = "Bad Request";

/// Failures of a download task, as reported to the user when the task finishes.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Bad request")]
    BadRequest { details: String },

    #[error("Exception occurred: {code}")]
    ProtocolFault { code: String, text: String },

    #[error("{0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to parse service response")]
    Xml(#[from] XmlError),

    #[error("Failed to create download directory '{0}'")]
    DownloadDirCreation(PathBuf, #[source] std::io::Error),

    #[error("I/O error on '{0}'")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Background worker failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl LoaderError {
    /// Classifies a failed fetch. An exception report in the response body is
    /// the most specific explanation, then the service's "Bad Request" status.
    pub fn from_network(error: NetworkError) -> LoaderError {
        if let Some(fault) = error.body().and_then(fault_from_body) {
            return fault;
        }
        let details = error.details();
        if details.contains(BAD_REQUEST_MARKER) {
            return LoaderError::BadRequest { details };
        }
        LoaderError::Network(error)
    }

    /// Errors with a structured user-facing message. Everything else is
    /// reported as an unhandled exception.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            LoaderError::InvalidParameter(_)
                | LoaderError::BadRequest { .. }
                | LoaderError::ProtocolFault { .. }
                | LoaderError::UnsupportedFormat(_)
                | LoaderError::Parameter(_)
        )
    }

    /// Secondary message shown next to the error.
    pub fn user_details(&self) -> String {
        match self {
            LoaderError::BadRequest { .. } => "Try with different parameters".to_string(),
            LoaderError::ProtocolFault { text, .. } => text.clone(),
            LoaderError::Network(e) => e.details(),
            other => {
                let mut details = Vec::new();
                let mut source = std::error::Error::source(other);
                while let Some(cause) = source {
                    details.push(cause.to_string());
                    source = cause.source();
                }
                details.join(": ")
            }
        }
    }
}
