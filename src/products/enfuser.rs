//! The Enfuser air quality forecast for the Helsinki metropolitan area,
//! downloaded without a stored query.

use crate::engine::FormatEngine;
use crate::error::LoaderError;
use crate::network::client::Network;
use crate::settings::Settings;
use crate::tasks::raster::{RasterLayers, RasterProcessor};
use crate::tasks::task::{DownloadTask, FetchMode, UriBuilder};
use crate::utils::ensure_dir_exists;
use crate::wfs::parameter::{round_datetime, BoundingBox, TIME_FORMAT};
use bon::bon;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub const ENFUSER_PRODUCER: &str = "enfuser_helsinki_metropolitan";
const ENFUSER_TITLE: &str = "Enfuser air quality forecast";
const FORMAT: &str = "netcdf";
const PROJECTION: &str = "EPSG:4326";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnfuserProduct {
    AirQualityIndex,
    NO2Concentration,
    O3Concentration,
    PM10Concentration,
    PM25Concentration,
}

impl EnfuserProduct {
    pub const ALL: [EnfuserProduct; 5] = [
        EnfuserProduct::AirQualityIndex,
        EnfuserProduct::NO2Concentration,
        EnfuserProduct::O3Concentration,
        EnfuserProduct::PM10Concentration,
        EnfuserProduct::PM25Concentration,
    ];

    /// Name used in the `param` request argument.
    pub fn alias(&self) -> &'static str {
        match self {
            EnfuserProduct::AirQualityIndex => "AQIndex",
            EnfuserProduct::NO2Concentration => "NO2Concentration",
            EnfuserProduct::O3Concentration => "O3Concentration",
            EnfuserProduct::PM10Concentration => "PM10Concentration",
            EnfuserProduct::PM25Concentration => "PM25Concentration",
        }
    }

    pub fn from_alias(alias: &str) -> Option<EnfuserProduct> {
        Self::ALL.into_iter().find(|p| p.alias() == alias)
    }
}

impl fmt::Display for EnfuserProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias())
    }
}

#[derive(Debug, Clone)]
pub struct EnfuserUri {
    download_url: String,
    products: BTreeSet<EnfuserProduct>,
    bbox: BoundingBox,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl EnfuserUri {
    /// Start and end are rounded to ten minutes like bound date time parameters.
    ///
    /// # Errors
    ///
    /// [`LoaderError::InvalidParameter`] for an empty product set or an end
    /// time before the start time.
    pub fn new(
        download_url: impl Into<String>,
        products: BTreeSet<EnfuserProduct>,
        bbox: BoundingBox,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self, LoaderError> {
        if products.is_empty() {
            return Err(LoaderError::InvalidParameter("Got empty products".to_string()));
        }
        if end_time < start_time {
            return Err(LoaderError::InvalidParameter(
                "End time is before start time".to_string(),
            ));
        }
        Ok(Self {
            download_url: download_url.into(),
            products,
            bbox,
            start_time: round_datetime(start_time),
            end_time: round_datetime(end_time),
        })
    }

    pub fn products(&self) -> impl Iterator<Item = EnfuserProduct> + '_ {
        self.products.iter().copied()
    }
}

impl UriBuilder for EnfuserUri {
    fn build_uri(&self) -> Result<String, LoaderError> {
        let products: Vec<&str> = self.products.iter().map(EnfuserProduct::alias).collect();
        let start = self.start_time.format(TIME_FORMAT);
        Ok(format!(
            "{}?producer={ENFUSER_PRODUCER}&param={}&bbox={}&levels=0&origintime={start}\
             &starttime={start}&endtime={}&format={FORMAT}&projection={PROJECTION}",
            self.download_url,
            products.join(":"),
            self.bbox.to_param_string(),
            self.end_time.format(TIME_FORMAT),
        ))
    }
}

#[bon]
impl DownloadTask {
    /// Download task for a set of Enfuser products. Each product becomes
    /// one raster layer.
    #[builder]
    pub async fn enfuser(
        products: BTreeSet<EnfuserProduct>,
        bbox: BoundingBox,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        settings: &Settings,
        network: Arc<dyn Network>,
        engine: Arc<dyn FormatEngine>,
        description: Option<String>,
        download_dir: Option<PathBuf>,
        add_to_map: Option<bool>,
    ) -> Result<DownloadTask, LoaderError> {
        let uri = EnfuserUri::new(
            settings.download_url.clone(),
            products,
            bbox,
            start_time,
            end_time,
        )?;
        let download_dir = download_dir.unwrap_or_else(|| settings.download_dir.clone());
        ensure_dir_exists(&download_dir).await?;

        let variables = uri.products().map(|p| p.alias().to_string()).collect();
        Ok(DownloadTask {
            description: description.unwrap_or_else(|| ENFUSER_TITLE.to_string()),
            download_dir,
            add_to_map: add_to_map.unwrap_or(true),
            fetch_mode: FetchMode::Buffered,
            processor: Arc::new(RasterProcessor::new(variables)),
            layer_builder: Box::new(RasterLayers::new(ENFUSER_TITLE)),
            uri_builder: Box::new(uri),
            network,
            engine,
        })
    }
}
