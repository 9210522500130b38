//! Service endpoints and local paths used by catalogs and download tasks.

use crate::utils::default_download_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

const DEFAULT_DOWNLOAD_URL: &str = "https://opendata.fmi.fi/download";
const DEFAULT_WFS_URL: &str = "https://opendata.fmi.fi/wfs";
const DEFAULT_WFS_VERSION: &str = "2.0.0";
const DEFAULT_WMS_URL: &str = "https://openwms.fmi.fi/geoserver/wms";
const DEFAULT_MESH_PROVIDER: &str = "mdal";

/// Names of the configurable settings. The name doubles as the environment
/// variable read by [`Settings::from_env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    DownloadUrl,
    WfsUrl,
    WfsVersion,
    WmsUrl,
    MeshProviderLib,
    DownloadDir,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::DownloadUrl,
        SettingKey::WfsUrl,
        SettingKey::WfsVersion,
        SettingKey::WmsUrl,
        SettingKey::MeshProviderLib,
        SettingKey::DownloadDir,
    ];

    pub fn env_var(&self) -> &'static str {
        match self {
            SettingKey::DownloadUrl => "FMI_DOWNLOAD_URL",
            SettingKey::WfsUrl => "FMI_WFS_URL",
            SettingKey::WfsVersion => "FMI_WFS_VERSION",
            SettingKey::WmsUrl => "FMI_WMS_URL",
            SettingKey::MeshProviderLib => "FMI_MESH_PROVIDER_LIB",
            SettingKey::DownloadDir => "FMI_DOWNLOAD_DIR",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.env_var())
    }
}

/// Configuration passed explicitly to catalogs and tasks.
///
/// # Examples
///
/// ```
/// use fmi_opendata::{SettingKey, Settings};
///
/// let settings = Settings::default();
/// assert_eq!(settings.get(SettingKey::WfsVersion), "2.0.0");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_url: String,
    pub wfs_url: String,
    pub wfs_version: String,
    pub wms_url: String,
    pub mesh_provider: String,
    pub download_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            wfs_url: DEFAULT_WFS_URL.to_string(),
            wfs_version: DEFAULT_WFS_VERSION.to_string(),
            wms_url: DEFAULT_WMS_URL.to_string(),
            mesh_provider: DEFAULT_MESH_PROVIDER.to_string(),
            download_dir: default_download_dir(),
        }
    }
}

impl Settings {
    /// Defaults overridden by any `FMI_*` environment variables that are set.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        for key in SettingKey::ALL {
            if let Ok(value) = env::var(key.env_var()) {
                settings.set(key, value);
            }
        }
        settings
    }

    /// Loads a persisted settings document. Missing keys keep their defaults.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn get(&self, key: SettingKey) -> String {
        match key {
            SettingKey::DownloadUrl => self.download_url.clone(),
            SettingKey::WfsUrl => self.wfs_url.clone(),
            SettingKey::WfsVersion => self.wfs_version.clone(),
            SettingKey::WmsUrl => self.wms_url.clone(),
            SettingKey::MeshProviderLib => self.mesh_provider.clone(),
            SettingKey::DownloadDir => self.download_dir.display().to_string(),
        }
    }

    pub fn set(&mut self, key: SettingKey, value: impl Into<String>) {
        let value = value.into();
        match key {
            SettingKey::DownloadUrl => self.download_url = value,
            SettingKey::WfsUrl => self.wfs_url = value,
            SettingKey::WfsVersion => self.wfs_version = value,
            SettingKey::WmsUrl => self.wms_url = value,
            SettingKey::MeshProviderLib => self.mesh_provider = value,
            SettingKey::DownloadDir => self.download_dir = PathBuf::from(value),
        }
    }
}
