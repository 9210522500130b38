//! Cancellable background downloads composed from a URI builder, a
//! post-processor and a layer builder.

use crate::engine::FormatEngine;
use crate::error::LoaderError;
use crate::layers::{LayerDescriptor, LayerRegistry, TemporalSettings};
use crate::metadata::DatasetMetadata;
use crate::network::client::{Network, FALLBACK_FILE_NAME};
use crate::network::error::NetworkError;
use crate::utils::safe_file_name;
use async_trait::async_trait;
use log::{error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Builds the request URI of a download.
pub trait UriBuilder: Send + Sync {
    fn build_uri(&self) -> Result<String, LoaderError>;

    /// Name of the downloaded file. `None` keeps the name the server suggests.
    fn file_name(&self) -> Option<String> {
        None
    }
}

/// Turns a downloaded file into something layers can be built from.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Async step run on the downloaded file before [`PostProcessor::process`].
    async fn prepare(&self, path: PathBuf) -> Result<PathBuf, LoaderError> {
        Ok(path)
    }

    /// Blocking step, run on a blocking worker.
    fn process(&self, path: &Path, engine: &dyn FormatEngine) -> Result<TaskOutput, LoaderError>;
}

pub trait LayerBuilder: Send + Sync {
    fn build_layers(&self, output: &TaskOutput) -> Vec<LayerDescriptor>;
}

/// A file written by post-processing and the name of the layer it backs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedFile {
    pub path: PathBuf,
    pub name: Option<String>,
}

/// Result of a successful download and post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub path_to_file: PathBuf,
    pub metadata: DatasetMetadata,
    pub produced_files: Vec<ProducedFile>,
}

impl TaskOutput {
    pub fn new(path_to_file: impl Into<PathBuf>, metadata: DatasetMetadata) -> Self {
        Self {
            path_to_file: path_to_file.into(),
            metadata,
            produced_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// How the payload is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Streamed to disk chunk by chunk.
    Stream,
    /// Fetched into memory, then written under the server suggested name.
    Buffered,
}

/// What the worker body ended with.
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded(TaskOutput),
    Failed(LoaderError),
    /// Cancellation was observed after the fetch. The file stays on disk.
    Cancelled { path_to_file: PathBuf },
}

impl TaskOutcome {
    fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Succeeded(_) => TaskState::Succeeded,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled { .. } => TaskState::Cancelled,
        }
    }
}

#[derive(Debug)]
pub struct TaskReport {
    pub description: String,
    pub state: TaskState,
    pub path_to_file: Option<PathBuf>,
    pub layers: Vec<LayerDescriptor>,
    /// Ids of the layers added to the registry.
    pub layer_ids: Vec<String>,
    pub exception: Option<LoaderError>,
}

impl TaskReport {
    fn new(description: &str, state: TaskState) -> Self {
        Self {
            description: description.to_string(),
            state,
            path_to_file: None,
            layers: Vec::new(),
            layer_ids: Vec::new(),
            exception: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// A download of one stored query or product.
///
/// Construct with [`DownloadTask::raster`], [`DownloadTask::mesh`],
/// [`DownloadTask::vector`] or [`DownloadTask::enfuser`], then run it with a
/// [`TaskScheduler`].
pub struct DownloadTask {
    pub(crate) description: String,
    pub(crate) download_dir: PathBuf,
    pub(crate) add_to_map: bool,
    pub(crate) fetch_mode: FetchMode,
    pub(crate) uri_builder: Box<dyn UriBuilder>,
    pub(crate) processor: Arc<dyn PostProcessor>,
    pub(crate) layer_builder: Box<dyn LayerBuilder>,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) engine: Arc<dyn FormatEngine>,
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("description", &self.description)
            .field("download_dir", &self.download_dir)
            .field("add_to_map", &self.add_to_map)
            .field("fetch_mode", &self.fetch_mode)
            .finish_non_exhaustive()
    }
}

impl DownloadTask {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn uri(&self) -> Result<String, LoaderError> {
        self.uri_builder.build_uri()
    }

    /// Worker body. Progress moves through 0, 10 and 70 and always ends at 100.
    ///
    /// Errors are captured in the outcome, never returned.
    pub async fn run(&self, progress: &watch::Sender<u8>, cancel: &CancellationToken) -> TaskOutcome {
        let outcome = self
            .execute(progress, cancel)
            .await
            .unwrap_or_else(TaskOutcome::Failed);
        progress.send_replace(100);
        outcome
    }

    async fn execute(
        &self,
        progress: &watch::Sender<u8>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, LoaderError> {
        progress.send_replace(0);
        let uri = self.uri_builder.build_uri()?;
        progress.send_replace(10);
        info!("Started task \"{}\"", self.description);
        info!("Download url is: \"{}\"", uri);

        let path = self.fetch(&uri).await.map_err(LoaderError::from_network)?;
        info!("File path is: \"{}\"", path.display());
        progress.send_replace(70);

        // Checked once, an ongoing transfer is not interrupted.
        if cancel.is_cancelled() {
            warn!("Task \"{}\" was cancelled", self.description);
            return Ok(TaskOutcome::Cancelled { path_to_file: path });
        }

        let output = self.post_process(path).await?;
        info!("Post-processing of \"{}\" succeeded", self.description);
        Ok(TaskOutcome::Succeeded(output))
    }

    async fn fetch(&self, uri: &str) -> Result<PathBuf, NetworkError> {
        let file_name = self.uri_builder.file_name();
        match self.fetch_mode {
            FetchMode::Stream => {
                self.network
                    .download_to_file(uri, &self.download_dir, file_name.as_deref())
                    .await
            }
            FetchMode::Buffered => {
                let (data, suggested) = self.network.fetch_raw(uri).await?;
                let name = file_name
                    .or_else(|| safe_file_name(&suggested))
                    .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
                let path = self.download_dir.join(name);
                tokio::fs::write(&path, &data)
                    .await
                    .map_err(|e| NetworkError::DownloadIo(path.clone(), e))?;
                Ok(path)
            }
        }
    }

    async fn post_process(&self, path: PathBuf) -> Result<TaskOutput, LoaderError> {
        let path = self.processor.prepare(path).await?;
        let processor = Arc::clone(&self.processor);
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || processor.process(&path, engine.as_ref())).await?
    }

    /// Terminal step, run by the caller after the worker body has returned.
    ///
    /// Builds layers of a successful download and, if the task was created
    /// with `add_to_map`, registers them. Failures are logged here.
    pub fn on_finished(&self, outcome: TaskOutcome, registry: &mut dyn LayerRegistry) -> TaskReport {
        let mut report = TaskReport::new(&self.description, outcome.state());
        match outcome {
            TaskOutcome::Succeeded(output) if output.path_to_file.is_file() => {
                report.layers = self.layer_builder.build_layers(&output);
                if self.add_to_map {
                    report.layer_ids = report
                        .layers
                        .iter()
                        .map(|layer| register(registry, layer))
                        .collect();
                }
                report.path_to_file = Some(output.path_to_file);
            }
            TaskOutcome::Succeeded(output) => {
                warn!(
                    "Task was not successful: {} is not a file",
                    output.path_to_file.display()
                );
                report.state = TaskState::Failed;
            }
            TaskOutcome::Cancelled { path_to_file } => {
                warn!("Task was not successful. Task was probably cancelled by user");
                report.path_to_file = Some(path_to_file);
            }
            TaskOutcome::Failed(exception) => {
                report_error(&exception);
                report.exception = Some(exception);
            }
        }
        report
    }
}

fn register(registry: &mut dyn LayerRegistry, layer: &LayerDescriptor) -> String {
    let id = registry.add_layer(layer);
    if let Some(TemporalSettings::FixedRange(range)) = &layer.temporal {
        registry.set_fixed_temporal_range(&id, *range);
    }
    if let Some(band) = layer.render_band {
        registry.set_single_band(&id, band);
    }
    info!("Added {} layer \"{}\" as {}", layer.kind, layer.name, id);
    id
}

fn report_error(exception: &LoaderError) {
    if exception.is_domain() {
        error!("{}: {}", exception, exception.user_details());
    } else {
        error!(
            "Unhandled exception occurred: {}: {}",
            exception,
            exception.user_details()
        );
    }
}

/// Runs download tasks on the tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct TaskScheduler;

impl TaskScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Starts `task` in the background.
    pub fn submit(&self, task: DownloadTask) -> TaskHandle {
        let (progress_tx, progress_rx) = watch::channel(0u8);
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        let cancel = CancellationToken::new();
        let description = task.description.clone();

        let worker_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            state_tx.send_replace(TaskState::Running);
            let outcome = task.run(&progress_tx, &worker_cancel).await;
            state_tx.send_replace(outcome.state());
            (task, outcome)
        });

        TaskHandle {
            description,
            progress: progress_rx,
            state: state_rx,
            cancel,
            join,
        }
    }
}

/// Caller side of a submitted [`DownloadTask`].
pub struct TaskHandle {
    description: String,
    progress: watch::Receiver<u8>,
    state: watch::Receiver<TaskState>,
    cancel: CancellationToken,
    join: JoinHandle<(DownloadTask, TaskOutcome)>,
}

impl TaskHandle {
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Progress in percent, updated by the worker.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.clone()
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the worker and runs [`DownloadTask::on_finished`] in the
    /// caller's context.
    pub async fn finish(self, registry: &mut dyn LayerRegistry) -> TaskReport {
        match self.join.await {
            Ok((task, outcome)) => task.on_finished(outcome, registry),
            Err(e) => {
                let exception = LoaderError::from(e);
                report_error(&exception);
                let mut report = TaskReport::new(&self.description, TaskState::Failed);
                report.exception = Some(exception);
                report
            }
        }
    }
}
