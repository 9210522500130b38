//! Grid downloads from the download service, rendered as raster layers.

use crate::engine::{FormatEngine, SubDataset};
use crate::error::LoaderError;
use crate::layers::{LayerDescriptor, LayerKind, TemporalSettings};
use crate::metadata::{DatasetMetadata, SubDatasetEntry};
use crate::network::client::Network;
use crate::settings::Settings;
use crate::tasks::task::{
    DownloadTask, FetchMode, LayerBuilder, PostProcessor, TaskOutput, UriBuilder,
};
use crate::utils::ensure_dir_exists;
use crate::wfs::stored_query::StoredQuery;
use async_trait::async_trait;
use bon::bon;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) const TIME_BOUNDS: &str = "time_bounds";
const RASTER_PROVIDER: &str = "gdal";
const LEVELS: &str = "levels";
const FORMAT: &str = "format";

/// `<download>?producer=..[&format=..]&<bound parameters>[&origintime=..]`
#[derive(Debug, Clone)]
pub struct RasterUri {
    download_url: String,
    query: StoredQuery,
}

impl RasterUri {
    pub fn new(download_url: impl Into<String>, query: StoredQuery) -> Self {
        Self {
            download_url: download_url.into(),
            query,
        }
    }
}

impl UriBuilder for RasterUri {
    fn build_uri(&self) -> Result<String, LoaderError> {
        if !self.query.is_expanded() {
            return Err(LoaderError::InvalidParameter(format!(
                "Stored query '{}' has no producer, expand it first",
                self.query.id
            )));
        }

        let bound: Vec<(&str, &str)> = self.query.parameters.bound().collect();
        let mut uri = format!("{}?producer={}", self.download_url, self.query.producer);
        if !self.query.format.is_empty() && !bound.iter().any(|(name, _)| *name == FORMAT) {
            uri.push_str(&format!("&format={}", self.query.format));
        }
        for (name, value) in &bound {
            uri.push_str(&format!("&{name}={value}"));
        }
        // Multi-level queries need an explicit origin time equal to the start.
        if bound.iter().any(|(name, _)| *name == LEVELS) {
            if let Some(start) = self.query.bound_start_time() {
                uri.push_str(&format!("&origintime={start}"));
            }
        }
        Ok(uri)
    }
}

/// Maps the sub-datasets of a downloaded file to the requested variables and
/// reads the time axis.
#[derive(Debug, Clone, Default)]
pub struct RasterProcessor {
    variables: Vec<String>,
}

impl RasterProcessor {
    pub fn new(variables: Vec<String>) -> Self {
        Self { variables }
    }
}

#[async_trait]
impl PostProcessor for RasterProcessor {
    fn process(&self, path: &Path, engine: &dyn FormatEngine) -> Result<TaskOutput, LoaderError> {
        let file_uri = path.to_string_lossy().into_owned();
        let sub_datasets = engine.sub_datasets(&file_uri)?;
        let mut metadata = DatasetMetadata::default();

        // All sub-datasets share the time axis of the first one.
        let metadata_uri = match sub_datasets.len() {
            0 => file_uri,
            1 => sub_datasets[0].uri.clone(),
            _ => {
                let entries = match_sub_datasets(&self.variables, sub_datasets)?;
                let first = entries[0].uri.clone();
                metadata.sub_datasets = Some(entries);
                first
            }
        };
        metadata.update_from_raster_metadata(&engine.metadata(&metadata_uri)?);
        debug!("Raster metadata of {}: {:?}", path.display(), metadata);
        Ok(TaskOutput::new(path, metadata))
    }
}

/// Pairs requested variables with sub-datasets, in order. Without requested
/// variables the sub-dataset names are used.
fn match_sub_datasets(
    variables: &[String],
    mut sub_datasets: Vec<SubDataset>,
) -> Result<Vec<SubDatasetEntry>, LoaderError> {
    let variables: Vec<String> = if variables.is_empty() {
        sub_datasets
            .iter()
            .map(SubDataset::variable_name)
            .filter(|name| !name.contains(TIME_BOUNDS))
            .collect()
    } else {
        variables.to_vec()
    };

    if sub_datasets.len() == variables.len() + 1 {
        sub_datasets.retain(|sub| !sub.variable_name().contains(TIME_BOUNDS));
    }
    if sub_datasets.len() != variables.len() || variables.is_empty() {
        warn!(
            "Cannot match {} variables with {} sub datasets",
            variables.len(),
            sub_datasets.len()
        );
        return Err(LoaderError::UnsupportedFormat(format!(
            "Downloaded file has {} sub datasets but {} variables were requested",
            sub_datasets.len(),
            variables.len()
        )));
    }

    Ok(variables
        .into_iter()
        .zip(sub_datasets)
        .map(|(variable, sub)| SubDatasetEntry {
            variable,
            uri: sub.uri,
        })
        .collect())
}

/// One raster layer per sub-dataset, or one for the whole file.
#[derive(Debug, Clone)]
pub struct RasterLayers {
    title: String,
}

impl RasterLayers {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl LayerBuilder for RasterLayers {
    fn build_layers(&self, output: &TaskOutput) -> Vec<LayerDescriptor> {
        let time_range = output.metadata.time_range();
        let layer = |name: &str, uri: &str| {
            let layer = LayerDescriptor::new(name, uri, LayerKind::Raster, RASTER_PROVIDER);
            match time_range {
                Some(range) => layer
                    .with_render_band(1)
                    .with_temporal(TemporalSettings::FixedRange(range)),
                None => layer,
            }
        };

        match &output.metadata.sub_datasets {
            Some(entries) => entries
                .iter()
                .map(|entry| layer(&entry.variable, &entry.uri))
                .collect(),
            None => vec![layer(&self.title, &output.path_to_file.to_string_lossy())],
        }
    }
}

#[bon]
impl DownloadTask {
    /// Download task for an expanded raster stored query.
    ///
    /// The download directory defaults to `settings.download_dir` and is
    /// created if missing. Layers are added to the registry unless
    /// `add_to_map(false)` is given.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::DownloadDirCreation`] if the download directory
    /// cannot be created.
    #[builder]
    pub async fn raster(
        query: StoredQuery,
        settings: &Settings,
        network: Arc<dyn Network>,
        engine: Arc<dyn FormatEngine>,
        description: Option<String>,
        download_dir: Option<PathBuf>,
        add_to_map: Option<bool>,
    ) -> Result<DownloadTask, LoaderError> {
        let download_dir = download_dir.unwrap_or_else(|| settings.download_dir.clone());
        ensure_dir_exists(&download_dir).await?;

        Ok(DownloadTask {
            description: description.unwrap_or_else(|| query.title.clone()),
            download_dir,
            add_to_map: add_to_map.unwrap_or(true),
            fetch_mode: FetchMode::Stream,
            processor: Arc::new(RasterProcessor::new(query.bound_variables())),
            layer_builder: Box::new(RasterLayers::new(query.title.clone())),
            uri_builder: Box::new(RasterUri::new(settings.download_url.clone(), query)),
            network,
            engine,
        })
    }
}
