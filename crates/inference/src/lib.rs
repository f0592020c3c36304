//! Backend-agnostic inference serving: a registry of declared models and
//! execution contexts, the `preprocess -> predict -> postprocess` pipeline,
//! task-specific post-processing and tracked background analyses.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod processing;
pub mod registry;
pub mod task;
pub mod tensor;

pub use backend::{ContextMetadata, ExecutionContext, ModelHandle};
pub use catalog::{ModelCatalog, bootstrap_contexts};
pub use config::AnalysisConfig;
pub use error::{ErrorKind, InferenceError, Result};
pub use model::{AnalyzeOptions, Model, ModelInfo, ModelMetadata, ModelSpec, TaskSpec, TaskType};
pub use pipeline::{AnalysisResult, ModelContext, Performance};
pub use processing::{AnalysisInput, TaskOutput};
pub use registry::{LATEST, Registry};
pub use task::{
    AnalysisRequest, FileTaskStore, InMemoryTaskStore, TaskManager, TaskRecord, TaskSettings,
    TaskStatus, TaskStore,
};
pub use tensor::{InferenceOutput, ModelInput};
