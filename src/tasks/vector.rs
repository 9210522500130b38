//! Feature downloads from the WFS, converted to Spatialite when the features
//! carry a text time field.

use crate::engine::{FormatEngine, VectorTranslate};
use crate::error::LoaderError;
use crate::layers::{LayerDescriptor, LayerKind, TemporalSettings};
use crate::metadata::DatasetMetadata;
use crate::network::client::Network;
use crate::settings::Settings;
use crate::tasks::task::{
    DownloadTask, FetchMode, LayerBuilder, PostProcessor, TaskOutput, UriBuilder,
};
use crate::utils::ensure_dir_exists;
use crate::wfs::stored_query::StoredQuery;
use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use bon::bon;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};
use uuid::Uuid;

const GML_DRIVER: &str = "GML";
const VECTOR_PROVIDER: &str = "ogr";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// `<wfs>?service=WFS&version=..&request=GetFeature[&count=..]&storedquery_id=..&<bound parameters>`
#[derive(Debug, Clone)]
pub struct VectorUri {
    wfs_url: String,
    wfs_version: String,
    query: StoredQuery,
    max_features: Option<u32>,
    file_name: String,
}

impl VectorUri {
    pub fn new(settings: &Settings, query: StoredQuery, max_features: Option<u32>) -> Self {
        let file_name = format!(
            "{}_{}.gml",
            query.id.replace("::", "_"),
            Uuid::new_v4().simple()
        );
        Self {
            wfs_url: settings.wfs_url.clone(),
            wfs_version: settings.wfs_version.clone(),
            query,
            max_features,
            file_name,
        }
    }
}

impl UriBuilder for VectorUri {
    fn build_uri(&self) -> Result<String, LoaderError> {
        let mut uri = format!(
            "{}?service=WFS&version={}&request=GetFeature",
            self.wfs_url, self.wfs_version
        );
        if let Some(count) = self.max_features {
            uri.push_str(&format!("&count={count}"));
        }
        uri.push_str(&format!("&storedquery_id={}", self.query.id));
        for (name, value) in self.query.parameters.bound() {
            uri.push_str(&format!("&{name}={value}"));
        }
        Ok(uri)
    }

    fn file_name(&self) -> Option<String> {
        Some(self.file_name.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VectorProcessor;

#[async_trait]
impl PostProcessor for VectorProcessor {
    /// The service may answer with gzip wrapped GML. Such payloads are
    /// decoded in place.
    async fn prepare(&self, path: PathBuf) -> Result<PathBuf, LoaderError> {
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| LoaderError::Io(path.clone(), e))?;
        if !data.starts_with(&GZIP_MAGIC) {
            return Ok(path);
        }

        let mut decoder = GzipDecoder::new(BufReader::new(data.as_slice()));
        let mut decompressed = Vec::with_capacity(data.len() * 4);
        decoder
            .read_to_end(&mut decompressed)
            .await
            .map_err(|e| LoaderError::Io(path.clone(), e))?;
        let text = String::from_utf8(decompressed).map_err(|e| {
            LoaderError::UnsupportedFormat(format!(
                "Decompressed {} is not UTF-8 text: {e}",
                path.display()
            ))
        })?;
        tokio::fs::write(&path, text.as_bytes())
            .await
            .map_err(|e| LoaderError::Io(path.clone(), e))?;
        info!(
            "Decompressed {} bytes into {}",
            text.len(),
            path.display()
        );
        Ok(path)
    }

    fn process(&self, path: &Path, engine: &dyn FormatEngine) -> Result<TaskOutput, LoaderError> {
        if !engine.has_vector_driver(GML_DRIVER)? {
            return Err(LoaderError::UnsupportedFormat(
                "Your gdal/ogr does not support GML drivers".to_string(),
            ));
        }

        let mut metadata = DatasetMetadata::default();
        metadata.update_from_vector_source(&engine.open_vector(path)?);
        let convertible = metadata.time_field_index.is_some()
            && metadata.fields.as_ref().is_some_and(|f| !f.is_empty());
        if !convertible {
            return Ok(TaskOutput::new(path, metadata));
        }

        let sqlite = path.with_extension("sqlite");
        let request = spatialite_request(&metadata);
        debug!("Converting {} with {:?}", path.display(), request);
        let source = engine.translate_vector(path, &sqlite, &request)?;
        if !metadata.is_datasource_valid(&source) {
            warn!(
                "Time field of {} is still not temporal after conversion",
                sqlite.display()
            );
            return Err(LoaderError::UnsupportedFormat(format!(
                "Could not convert {} to Spatialite with a temporal field",
                path.display()
            )));
        }
        info!("Converted {} to {}", path.display(), sqlite.display());
        Ok(TaskOutput::new(sqlite, metadata))
    }
}

/// Spatialite conversion that casts the text time field to a timestamp.
fn spatialite_request(metadata: &DatasetMetadata) -> VectorTranslate {
    let fields = metadata.fields.as_deref().unwrap_or_default();
    let time_field = metadata
        .time_field_index
        .and_then(|idx| fields.get(idx))
        .map(String::as_str)
        .unwrap_or_default();
    let mut columns: Vec<String> = fields
        .iter()
        .filter(|f| f.as_str() != time_field)
        .cloned()
        .collect();
    columns.push(format!("cast({time_field} as TIMESTAMP) {time_field}"));

    VectorTranslate {
        format: "SQLite".to_string(),
        creation_options: vec!["SPATIALITE=YES".to_string()],
        options: vec![
            "-nlt".to_string(),
            "CONVERT_TO_LINEAR".to_string(),
            "-forceNullable".to_string(),
        ],
        sql: Some(format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            metadata.layer_name
        )),
    }
}

/// A single vector layer named after the query.
#[derive(Debug, Clone)]
pub struct VectorLayers {
    title: String,
    step_minutes: i64,
}

impl VectorLayers {
    pub fn new(title: impl Into<String>, step_minutes: i64) -> Self {
        Self {
            title: title.into(),
            step_minutes,
        }
    }
}

impl LayerBuilder for VectorLayers {
    fn build_layers(&self, output: &TaskOutput) -> Vec<LayerDescriptor> {
        let mut layer = LayerDescriptor::new(
            self.title.as_str(),
            output.path_to_file.to_string_lossy(),
            LayerKind::Vector,
            VECTOR_PROVIDER,
        );
        if let Some(field) = output.metadata.temporal_field() {
            if self.step_minutes > 0 {
                layer = layer.with_temporal(TemporalSettings::Field {
                    field,
                    step_minutes: self.step_minutes,
                });
            }
        }
        vec![layer]
    }
}

#[bon]
impl DownloadTask {
    /// Download task for a vector stored query. `max_features` caps the
    /// number of returned features.
    #[builder]
    pub async fn vector(
        query: StoredQuery,
        settings: &Settings,
        network: Arc<dyn Network>,
        engine: Arc<dyn FormatEngine>,
        description: Option<String>,
        download_dir: Option<PathBuf>,
        add_to_map: Option<bool>,
        max_features: Option<u32>,
    ) -> Result<DownloadTask, LoaderError> {
        let download_dir = download_dir.unwrap_or_else(|| settings.download_dir.clone());
        ensure_dir_exists(&download_dir).await?;

        Ok(DownloadTask {
            description: description.unwrap_or_else(|| query.title.clone()),
            download_dir,
            add_to_map: add_to_map.unwrap_or(true),
            fetch_mode: FetchMode::Stream,
            processor: Arc::new(VectorProcessor),
            layer_builder: Box::new(VectorLayers::new(
                query.title.clone(),
                query.time_step_minutes(),
            )),
            uri_builder: Box::new(VectorUri::new(settings, query, max_features)),
            network,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, FieldInfo, FieldType, VectorLayerInfo, VectorSource};
    use crate::layers::MemoryProject;
    use crate::tasks::task::{TaskScheduler, TaskState};
    use crate::testing::{air_quality_query, FakeEngine, FakeNetwork};
    use crate::wfs::parameter::BoundingBox;
    use async_compression::tokio::write::GzipEncoder;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    const GML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" numberMatched="1" numberReturned="1"/>"#;

    fn bound_air_quality_query() -> StoredQuery {
        let mut query = air_quality_query();
        let params = &mut query.parameters;
        params
            .get_mut("starttime")
            .unwrap()
            .set_value(Utc.with_ymd_and_hms(2020, 11, 5, 0, 0, 0).unwrap())
            .unwrap();
        params
            .get_mut("endtime")
            .unwrap()
            .set_value(Utc.with_ymd_and_hms(2020, 11, 6, 0, 0, 0).unwrap())
            .unwrap();
        params.get_mut("timestep").unwrap().set_value(60i64).unwrap();
        params
            .get_mut("bbox")
            .unwrap()
            .set_value(BoundingBox::new(21.0, 59.7, 31.7, 70.0))
            .unwrap();
        query
    }

    fn observations(time_type: FieldType) -> VectorSource {
        VectorSource {
            layers: vec![VectorLayerInfo {
                name: "BsWfsElement".into(),
                fields: vec![
                    FieldInfo::new("gml_id", FieldType::String),
                    FieldInfo::new("Time", time_type),
                    FieldInfo::new("ParameterName", FieldType::String),
                    FieldInfo::new("ParameterValue", FieldType::Real),
                ],
            }],
        }
    }

    #[test]
    fn test_construct_uri() {
        let uri = VectorUri::new(&Settings::default(), bound_air_quality_query(), None)
            .build_uri()
            .unwrap();
        assert_eq!(
            uri,
            "https://opendata.fmi.fi/wfs?service=WFS&version=2.0.0&request=GetFeature\
             &storedquery_id=fmi::observations::airquality::hourly::simple\
             &starttime=2020-11-05T00:00:00Z\
             &endtime=2020-11-06T00:00:00Z\
             &timestep=60\
             &bbox=21.0,59.7,31.7,70.0"
        );
    }

    #[test]
    fn test_feature_count_cap() {
        let uri = VectorUri::new(&Settings::default(), bound_air_quality_query(), Some(100))
            .build_uri()
            .unwrap();
        assert!(uri.contains("request=GetFeature&count=100&storedquery_id="));
    }

    #[test]
    fn test_file_name_is_unique_per_download() {
        let a = VectorUri::new(&Settings::default(), air_quality_query(), None);
        let b = VectorUri::new(&Settings::default(), air_quality_query(), None);
        let name = a.file_name().unwrap();
        assert!(name.starts_with("fmi_observations_airquality_hourly_simple_"));
        assert!(name.ends_with(".gml"));
        assert_ne!(a.file_name(), b.file_name());
    }

    #[test]
    fn test_spatialite_request_casts_time_field() {
        let mut metadata = DatasetMetadata::default();
        metadata.update_from_vector_source(&observations(FieldType::String));
        let request = spatialite_request(&metadata);
        assert_eq!(request.format, "SQLite");
        assert_eq!(request.creation_options, ["SPATIALITE=YES"]);
        assert_eq!(
            request.sql.as_deref(),
            Some(
                "SELECT gml_id, ParameterName, ParameterValue, \
                 cast(Time as TIMESTAMP) Time FROM BsWfsElement"
            )
        );
    }

    #[tokio::test]
    async fn test_gzip_payload_is_decoded_in_place() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("features.gml");
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(GML.as_bytes()).await.unwrap();
        encoder.shutdown().await.unwrap();
        std::fs::write(&path, encoder.into_inner()).unwrap();

        let prepared = VectorProcessor.prepare(path.clone()).await.unwrap();
        assert_eq!(prepared, path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), GML);

        // Plain payloads are left untouched.
        VectorProcessor.prepare(path.clone()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), GML);
    }

    #[test]
    fn test_missing_gml_driver() {
        let tmp = TempDir::new().unwrap();
        let engine = FakeEngine::new().without_vector_drivers();
        let err = VectorProcessor
            .process(&tmp.path().join("features.gml"), &engine)
            .unwrap_err();
        assert!(
            matches!(err, LoaderError::UnsupportedFormat(ref m) if m == "Your gdal/ogr does not support GML drivers")
        );
    }

    #[test]
    fn test_native_time_field_needs_no_conversion() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("features.gml");
        let engine = FakeEngine::new().with_vector(&path, observations(FieldType::DateTime));
        let output = VectorProcessor.process(&path, &engine).unwrap();
        assert_eq!(output.path_to_file, path);
        assert!(engine.vector_writes().is_empty());
    }

    #[tokio::test]
    async fn test_download_converts_to_spatialite() {
        let tmp = TempDir::new().unwrap();
        let network = FakeNetwork::new().respond_file("request=GetFeature", GML.as_bytes().to_vec(), "ignored.xml");
        let query = bound_air_quality_query();
        let task = DownloadTask::vector()
            .query(query.clone())
            .settings(&Settings::default())
            .network(Arc::new(network))
            .engine(Arc::new(
                FakeEngine::new()
                    .with_any_vector(observations(FieldType::String))
                    .with_translated_vector(observations(FieldType::DateTime)),
            ))
            .download_dir(tmp.path().to_path_buf())
            .call()
            .await
            .unwrap();

        let mut project = MemoryProject::new();
        let report = TaskScheduler::new().submit(task).finish(&mut project).await;

        assert_eq!(report.state, TaskState::Succeeded, "{:?}", report.exception);
        let path = report.path_to_file.unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("sqlite"));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("fmi_observations_airquality_hourly_simple_"));
        assert_eq!(report.layers.len(), 1);
        let layer = &report.layers[0];
        assert_eq!(layer.name, query.title);
        assert_eq!(layer.kind, LayerKind::Vector);
        assert_eq!(
            layer.temporal,
            Some(TemporalSettings::Field {
                field: "time".into(),
                step_minutes: 60
            })
        );
        assert_eq!(project.layers().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_conversion_is_reported() {
        let tmp = TempDir::new().unwrap();
        let network = FakeNetwork::new().respond_file("request=GetFeature", GML.as_bytes().to_vec(), "ignored.xml");
        // The cast did not take, the time field is still text.
        let engine = FakeEngine::new()
            .with_any_vector(observations(FieldType::String))
            .with_translated_vector(observations(FieldType::String));
        let task = DownloadTask::vector()
            .query(bound_air_quality_query())
            .settings(&Settings::default())
            .network(Arc::new(network))
            .engine(Arc::new(engine))
            .download_dir(tmp.path().to_path_buf())
            .call()
            .await
            .unwrap();

        let mut project = MemoryProject::new();
        let report = TaskScheduler::new().submit(task).finish(&mut project).await;

        assert_eq!(report.state, TaskState::Failed);
        assert!(matches!(report.exception, Some(LoaderError::UnsupportedFormat(_))));
        assert!(project.layers().is_empty());
    }

    #[tokio::test]
    async fn test_engine_error_during_conversion_fails_task() {
        let tmp = TempDir::new().unwrap();
        let network = FakeNetwork::new().respond_file("request=GetFeature", GML.as_bytes().to_vec(), "ignored.xml");
        let engine = FakeEngine::new()
            .with_any_vector(observations(FieldType::String))
            .failing_vector_translation("sqlite3_open failed: disk I/O error");
        let task = DownloadTask::vector()
            .query(bound_air_quality_query())
            .settings(&Settings::default())
            .network(Arc::new(network))
            .engine(Arc::new(engine))
            .download_dir(tmp.path().to_path_buf())
            .call()
            .await
            .unwrap();

        let mut project = MemoryProject::new();
        let report = TaskScheduler::new().submit(task).finish(&mut project).await;

        assert_eq!(report.state, TaskState::Failed);
        assert!(matches!(
            report.exception,
            Some(LoaderError::Engine(EngineError::VectorTranslate { ref message, .. }))
                if message == "sqlite3_open failed: disk I/O error"
        ));
        assert!(report.layers.is_empty());
        assert!(project.layers().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_task_adds_no_layers() {
        let tmp = TempDir::new().unwrap();
        let network = FakeNetwork::new().respond_file("request=GetFeature", GML.as_bytes().to_vec(), "ignored.xml");
        let task = DownloadTask::vector()
            .query(bound_air_quality_query())
            .settings(&Settings::default())
            .network(Arc::new(network))
            .engine(Arc::new(FakeEngine::new()))
            .download_dir(tmp.path().to_path_buf())
            .call()
            .await
            .unwrap();

        let handle = TaskScheduler::new().submit(task);
        // The single threaded test runtime has not polled the worker yet.
        handle.cancel();
        assert!(handle.is_cancelled());
        let progress = handle.progress();
        let mut project = MemoryProject::new();
        let report = handle.finish(&mut project).await;

        assert_eq!(report.state, TaskState::Cancelled);
        assert!(report.exception.is_none());
        assert!(report.layers.is_empty());
        assert!(report.path_to_file.unwrap().is_file());
        assert_eq!(*progress.borrow(), 100);
        assert!(project.layers().is_empty());
    }
}
