use crate::error::LoaderError;
use log::info;
use std::io;
use std::path::{Path, PathBuf};

const DOWNLOAD_DIR_NAME: &str = "fmi_opendata";

/// Platform cache directory joined with the crate's folder name, or a
/// folder in the system temp dir when no cache directory is known.
pub fn default_download_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DOWNLOAD_DIR_NAME)
}

/// Last component of a file name supplied by a remote party, so that joining
/// it onto a directory stays inside that directory. `None` if nothing usable
/// remains.
pub(crate) fn safe_file_name(name: &str) -> Option<String> {
    Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .map(str::to_string)
}

pub async fn ensure_dir_exists(path: &Path) -> Result<(), LoaderError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(LoaderError::DownloadDirCreation(
                    path.to_path_buf(),
                    io::Error::new(io::ErrorKind::AlreadyExists, "path is not a directory"),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating download directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| LoaderError::DownloadDirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(LoaderError::DownloadDirCreation(path.to_path_buf(), e)),
    }
}
