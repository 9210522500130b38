//! Network fetch collaborator: a trait for the operations the catalogs and
//! download tasks need, and its `reqwest` implementation.

use crate::network::error::NetworkError;
use crate::utils::safe_file_name;
use async_trait::async_trait;
use futures_util::{pin_mut, Stream, StreamExt};
use log::{debug, info, warn};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub(crate) const FALLBACK_FILE_NAME: &str = "download";
const PARTIAL_SUFFIX: &str = ".part";

#[async_trait]
pub trait Network: Send + Sync {
    /// Fetches a text document.
    async fn fetch(&self, uri: &str) -> Result<String, NetworkError>;

    /// Fetches raw bytes together with the file name suggested by the server.
    async fn fetch_raw(&self, uri: &str) -> Result<(Vec<u8>, String), NetworkError>;

    /// Streams the response into `dir`, named `output_name` or the suggested name.
    async fn download_to_file(
        &self,
        uri: &str,
        dir: &Path,
        output_name: Option<&str>,
    ) -> Result<PathBuf, NetworkError>;
}

pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, uri: &str) -> Result<Response, NetworkError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| NetworkError::NetworkRequest(uri.to_string(), e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // The provider explains rejected requests in the body, keep it.
        let body = response.text().await.unwrap_or_default();
        warn!("HTTP error for {}: {}", uri, status);
        Err(NetworkError::HttpStatus {
            url: uri.to_string(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

#[async_trait]
impl Network for HttpClient {
    async fn fetch(&self, uri: &str) -> Result<String, NetworkError> {
        self.get(uri)
            .await?
            .text()
            .await
            .map_err(|e| NetworkError::NetworkRequest(uri.to_string(), e))
    }

    async fn fetch_raw(&self, uri: &str) -> Result<(Vec<u8>, String), NetworkError> {
        let response = self.get(uri).await?;
        let name = suggested_file_name(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| NetworkError::NetworkRequest(uri.to_string(), e))?;
        Ok((bytes.to_vec(), name))
    }

    async fn download_to_file(
        &self,
        uri: &str,
        dir: &Path,
        output_name: Option<&str>,
    ) -> Result<PathBuf, NetworkError> {
        let response = self.get(uri).await?;
        let name = output_name
            .and_then(safe_file_name)
            .unwrap_or_else(|| suggested_file_name(&response));
        let path = dir.join(name);

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| NetworkError::NetworkRequest(uri.to_string(), e)));
        let written = stream_to_file(chunks, &path).await?;
        info!("Downloaded {} bytes to {:?}", written, path);
        Ok(path)
    }
}

/// Writes `chunks` to `<path>.part` and renames it to `path` once the body
/// is complete. The partial file is removed if the body fails.
pub(crate) async fn stream_to_file<S, B>(chunks: S, path: &Path) -> Result<usize, NetworkError>
where
    S: Stream<Item = Result<B, NetworkError>>,
    B: AsRef<[u8]>,
{
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let written = match write_chunks(chunks, &partial).await {
        Ok(written) => written,
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!("Could not remove {:?}: {}", partial, cleanup);
            }
            return Err(e);
        }
    };
    fs::rename(&partial, path)
        .await
        .map_err(|e| NetworkError::DownloadIo(path.to_path_buf(), e))?;
    Ok(written)
}

async fn write_chunks<S, B>(chunks: S, path: &Path) -> Result<usize, NetworkError>
where
    S: Stream<Item = Result<B, NetworkError>>,
    B: AsRef<[u8]>,
{
    pin_mut!(chunks);
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| NetworkError::DownloadIo(path.to_path_buf(), e))?;
    let mut written = 0usize;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        file.write_all(chunk.as_ref())
            .await
            .map_err(|e| NetworkError::DownloadIo(path.to_path_buf(), e))?;
        written += chunk.as_ref().len();
    }
    file.flush()
        .await
        .map_err(|e| NetworkError::DownloadIo(path.to_path_buf(), e))?;
    Ok(written)
}

fn suggested_file_name(response: &Response) -> String {
    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok());
    file_name_from_disposition(disposition)
        .or_else(|| file_name_from_url(response.url().path()))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

pub(crate) fn file_name_from_disposition(disposition: Option<&str>) -> Option<String> {
    disposition?
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .and_then(|name| safe_file_name(name.trim_matches('"')))
}

fn file_name_from_url(path: &str) -> Option<String> {
    path.rsplit('/').next().and_then(safe_file_name)
}
