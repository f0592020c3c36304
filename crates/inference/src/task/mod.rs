//! Tracked analysis tasks: background execution with persisted outcomes.

pub mod store;

pub use store::{FileTaskStore, InMemoryTaskStore, TaskStore};

use crate::error::{ErrorKind, InferenceError, Result};
use crate::metrics::{AnalysisMetrics, Mode};
use crate::model::AnalyzeOptions;
use crate::pipeline::AnalysisResult;
use crate::processing::AnalysisInput;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub file_name: String,
    /// Enriched analysis result, set once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TaskRecord {
    pub fn processing(task_id: &str, file_name: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Processing,
            file_name: file_name.to_string(),
            result: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn completed(task_id: &str, file_name: &str, result: Value) -> Self {
        Self {
            status: TaskStatus::Completed,
            result: Some(result),
            ..Self::processing(task_id, file_name)
        }
    }

    pub fn failed(task_id: &str, file_name: &str, error: &InferenceError) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Self::processing(task_id, file_name)
        }
    }
}

/// One file to analyze with a registered model.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub model_id: String,
    pub model_version: String,
    pub context_name: String,
    pub file_path: PathBuf,
    /// Name reported back to the caller, usually the original upload name.
    pub file_name: String,
    pub options: AnalyzeOptions,
    /// Delete `file_path` once the task finishes, whatever the outcome.
    pub cleanup_input: bool,
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub cleanup_input_files: bool,
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            cleanup_input_files: true,
            timeout: Duration::from_secs(300),
            max_concurrent: 10,
        }
    }
}

/// Immediate reply to a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskAck {
    pub task_id: String,
    pub status: TaskStatus,
}

pub struct SubmittedTask {
    pub ack: TaskAck,
    handle: JoinHandle<TaskRecord>,
}

impl SubmittedTask {
    /// Wait for the terminal record.
    pub async fn wait(self) -> Result<TaskRecord> {
        Ok(self.handle.await?)
    }
}

/// Removes the input file when dropped.
struct CleanupGuard<'a> {
    path: &'a Path,
    enabled: bool,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        match std::fs::remove_file(self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed input file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove input file")
            }
        }
    }
}

#[derive(Clone)]
pub struct TaskManager {
    registry: Arc<Registry>,
    store: Arc<dyn TaskStore>,
    settings: TaskSettings,
    permits: Arc<Semaphore>,
    metrics: AnalysisMetrics,
}

impl TaskManager {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn TaskStore>, settings: TaskSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            registry,
            store,
            settings,
            permits,
            metrics: AnalysisMetrics::new("inference"),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Persist a `processing` record and run the analysis in the background.
    ///
    /// Failures inside the task end up in its record and are never returned here.
    pub fn submit(&self, request: AnalysisRequest) -> Result<SubmittedTask> {
        let task_id = Uuid::new_v4().to_string();
        self.store
            .save(&TaskRecord::processing(&task_id, &request.file_name))?;
        tracing::info!(
            task_id = %task_id,
            model = %request.model_id,
            file_name = %request.file_name,
            "Task accepted"
        );

        let worker = self.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move { worker.run_background(id, request).await });

        Ok(SubmittedTask {
            ack: TaskAck {
                task_id,
                status: TaskStatus::Processing,
            },
            handle,
        })
    }

    /// Run an analysis on the caller's task, persisting the outcome.
    ///
    /// The completed record is returned; a failure is persisted and then returned as the error.
    pub async fn analyze_now(&self, request: AnalysisRequest) -> Result<TaskRecord> {
        let task_id = Uuid::new_v4().to_string();
        let _cleanup = self.cleanup_guard(&request);

        let started = Instant::now();
        let outcome = self.execute_with_timeout(&request).await;
        self.metrics
            .record(&request.model_id, Mode::Sync, started.elapsed(), outcome.is_ok());

        match outcome.and_then(|result| enrich(&result, &task_id, &request.file_name)) {
            Ok(value) => {
                let record = TaskRecord::completed(&task_id, &request.file_name, value);
                self.store.save(&record)?;
                Ok(record)
            }
            Err(e) => {
                self.persist(&TaskRecord::failed(&task_id, &request.file_name, &e));
                Err(e)
            }
        }
    }

    pub fn status(&self, task_id: &str) -> Result<TaskRecord> {
        self.store
            .load(task_id)?
            .ok_or_else(|| InferenceError::NotFound(format!("task {}", task_id)))
    }

    #[tracing::instrument(name = "task", skip(self, request), fields(model = %request.model_id))]
    async fn run_background(self, task_id: String, request: AnalysisRequest) -> TaskRecord {
        let _cleanup = self.cleanup_guard(&request);

        let outcome = match self.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                let started = Instant::now();
                let outcome = self.execute_with_timeout(&request).await;
                self.metrics
                    .record(&request.model_id, Mode::Async, started.elapsed(), outcome.is_ok());
                outcome
            }
            Err(e) => Err(InferenceError::IllegalState(format!("task scheduler closed: {}", e))),
        };

        let record = match outcome.and_then(|result| enrich(&result, &task_id, &request.file_name)) {
            Ok(value) => {
                tracing::info!("Task completed");
                TaskRecord::completed(&task_id, &request.file_name, value)
            }
            Err(e) => {
                tracing::error!(error = %e, kind = ?e.kind(), "Task failed");
                TaskRecord::failed(&task_id, &request.file_name, &e)
            }
        };
        self.persist(&record);
        record
    }

    async fn execute_with_timeout(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let timeout = self.settings.timeout;
        tokio::time::timeout(timeout, self.execute(request))
            .await
            .unwrap_or(Err(InferenceError::Timeout(timeout)))
    }

    async fn execute(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let registry = self.registry.clone();
        let (model_id, version, context) = (
            request.model_id.clone(),
            request.model_version.clone(),
            request.context_name.clone(),
        );
        let pair = tokio::task::spawn_blocking(move || registry.create_pair(&model_id, &version, &context))
            .await??
            .ok_or_else(|| {
                InferenceError::NotFound(format!(
                    "model {}@{} or context '{}'",
                    request.model_id, request.model_version, request.context_name
                ))
            })?;

        pair.analyze(AnalysisInput::Path(request.file_path.clone()), request.options.clone())
            .await
    }

    fn persist(&self, record: &TaskRecord) {
        if let Err(e) = self.store.save(record) {
            tracing::error!(task_id = %record.task_id, error = %e, "Failed to persist task record");
        }
    }

    fn cleanup_guard<'a>(&self, request: &'a AnalysisRequest) -> CleanupGuard<'a> {
        CleanupGuard {
            path: &request.file_path,
            enabled: request.cleanup_input && self.settings.cleanup_input_files,
        }
    }
}

/// Serialize a result and stamp it with the task id and file name.
fn enrich(result: &AnalysisResult, task_id: &str, file_name: &str) -> Result<Value> {
    let mut value = serde_json::to_value(result)?;
    if let Value::Object(map) = &mut value {
        map.insert("task_id".to_string(), Value::from(task_id));
        map.insert("file_name".to_string(), Value::from(file_name));
    }
    Ok(value)
}
