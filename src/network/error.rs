use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status} {reason}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
        body: String,
    },

    // Covers errors while streaming the body to disk
    #[error("Failed to write download to '{0}'")]
    DownloadIo(PathBuf, #[source] std::io::Error),
}

impl NetworkError {
    /// Structured detail message of the failure, as shown to the user.
    pub fn details(&self) -> String {
        match self {
            NetworkError::NetworkRequest(url, source) => format!("{url}: {source}"),
            NetworkError::HttpStatus {
                status,
                reason,
                body,
                ..
            } => format!("{status} {reason}: {body}"),
            NetworkError::DownloadIo(path, source) => format!("{}: {source}", path.display()),
        }
    }

    /// Response body of a failed HTTP request, if the server sent one.
    pub fn body(&self) -> Option<&str> {
        match self {
            NetworkError::HttpStatus { body, .. } if !body.trim().is_empty() => Some(body),
            _ => None,
        }
    }
}
