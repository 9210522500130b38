//! Grid downloads rendered as mesh layers.
//!
//! Mesh providers want a spatial first sub-dataset and a time dimension that
//! is literally called `time`, so every spatial sub-dataset is written to its
//! own NetCDF file with normalized dimension names.

use crate::engine::FormatEngine;
use crate::error::LoaderError;
use crate::layers::{LayerDescriptor, LayerKind, TemporalSettings};
use crate::metadata::{fix_dimension_naming, DatasetMetadata};
use crate::network::client::Network;
use crate::settings::Settings;
use crate::tasks::raster::{RasterUri, TIME_BOUNDS};
use crate::tasks::task::{
    DownloadTask, FetchMode, LayerBuilder, PostProcessor, ProducedFile, TaskOutput,
};
use crate::utils::ensure_dir_exists;
use crate::wfs::stored_query::StoredQuery;
use async_trait::async_trait;
use bon::bon;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LONG_NAME: &str = "long_name";

#[derive(Debug, Clone, Copy, Default)]
pub struct MeshProcessor;

/// `<stem>_<variable>.nc` next to `original`.
fn split_file_path(original: &Path, variable: &str) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    original.with_file_name(format!("{stem}_{variable}.nc"))
}

#[async_trait]
impl PostProcessor for MeshProcessor {
    fn process(&self, path: &Path, engine: &dyn FormatEngine) -> Result<TaskOutput, LoaderError> {
        let file_uri = path.to_string_lossy().into_owned();
        let sub_datasets: Vec<_> = engine
            .sub_datasets(&file_uri)?
            .into_iter()
            .filter(|sub| !sub.variable_name().contains(TIME_BOUNDS))
            .collect();

        if sub_datasets.is_empty() {
            let mut metadata = DatasetMetadata::default();
            metadata.update_from_raster_metadata(&fix_dimension_naming(&engine.metadata(&file_uri)?));
            let mut output = TaskOutput::new(path, metadata);
            output.produced_files.push(ProducedFile {
                path: path.to_path_buf(),
                name: None,
            });
            return Ok(output);
        }

        let mut metadata = DatasetMetadata::default();
        let mut produced_files = Vec::with_capacity(sub_datasets.len());
        for (idx, sub) in sub_datasets.iter().enumerate() {
            let variable = sub.variable_name();
            let fixed = fix_dimension_naming(&engine.metadata(&sub.uri)?);
            if idx == 0 {
                metadata.update_from_raster_metadata(&fixed);
            }
            let name = engine
                .band_metadata(&sub.uri, 1)?
                .remove(LONG_NAME)
                .unwrap_or_else(|| variable.clone());

            let split = split_file_path(path, &variable);
            engine.translate_raster(&sub.uri, &split, &fixed)?;
            debug!("Wrote {} as {}", sub.uri, split.display());
            produced_files.push(ProducedFile {
                path: split,
                name: Some(name),
            });
        }
        info!(
            "Split {} into {} mesh files",
            path.display(),
            produced_files.len()
        );

        let mut output = TaskOutput::new(path, metadata);
        output.produced_files = produced_files;
        Ok(output)
    }
}

/// One temporally active mesh layer per produced file.
#[derive(Debug, Clone)]
pub struct MeshLayers {
    title: String,
    provider: String,
}

impl MeshLayers {
    pub fn new(title: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            provider: provider.into(),
        }
    }
}

impl LayerBuilder for MeshLayers {
    fn build_layers(&self, output: &TaskOutput) -> Vec<LayerDescriptor> {
        output
            .produced_files
            .iter()
            .map(|file| {
                LayerDescriptor::new(
                    file.name.as_deref().unwrap_or(&self.title),
                    file.path.to_string_lossy(),
                    LayerKind::Mesh,
                    self.provider.as_str(),
                )
                .with_temporal(TemporalSettings::ProviderActive)
            })
            .collect()
    }
}

#[bon]
impl DownloadTask {
    /// Download task for an expanded raster stored query, loaded as meshes
    /// with the provider named by `settings.mesh_provider`.
    #[builder]
    pub async fn mesh(
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
            processor: Arc::new(MeshProcessor),
            layer_builder: Box::new(MeshLayers::new(
                query.title.clone(),
                settings.mesh_provider.clone(),
            )),
            uri_builder: Box::new(RasterUri::new(settings.download_url.clone(), query)),
            network,
            engine,
        })
    }
}
