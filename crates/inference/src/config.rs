use crate::error::{InferenceError, Result};
use crate::task::TaskSettings;
use common::config::{env_flag, env_parse, env_string};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub environment: Environment,
    pub models_dir: PathBuf,
    pub results_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub default_context: String,
    pub cleanup_input_files: bool,
    pub task_timeout: Duration,
    pub max_concurrent_tasks: usize,
    pub ort_cpu_threads: usize,
    pub otel_endpoint: Option<String>,
}

impl AnalysisConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        let models_dir = PathBuf::from(env_string("MODELS_DIR", "models_repository"));
        let catalog_path = env::var("MODEL_CATALOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| models_dir.join("catalog.json"));

        let config = Self {
            environment: Environment::from_env(),
            results_dir: PathBuf::from(env_string("RESULTS_DIR", "results")),
            catalog_path,
            models_dir,
            default_context: env_string("DEFAULT_CONTEXT", "onnx"),
            cleanup_input_files: env_flag("CLEANUP_INPUT_FILES", true),
            task_timeout: Duration::from_secs(env_parse("TASK_TIMEOUT_SECS", 300)),
            max_concurrent_tasks: env_parse("MAX_CONCURRENT_TASKS", 10),
            ort_cpu_threads: env_parse("ORT_CPU_THREADS", 4),
            otel_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.task_timeout.is_zero() {
            return Err(InferenceError::Validation(
                "TASK_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(InferenceError::Validation(
                "MAX_CONCURRENT_TASKS must be at least 1".to_string(),
            ));
        }
        if self.ort_cpu_threads == 0 {
            return Err(InferenceError::Validation(
                "ORT_CPU_THREADS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            cleanup_input_files: self.cleanup_input_files,
            timeout: self.task_timeout,
            max_concurrent: self.max_concurrent_tasks,
        }
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            models_dir: PathBuf::from("models_repository"),
            results_dir: PathBuf::from("results"),
            catalog_path: PathBuf::from("models_repository/catalog.json"),
            default_context: "onnx".to_string(),
            cleanup_input_files: true,
            task_timeout: Duration::from_secs(300),
            max_concurrent_tasks: 10,
            ort_cpu_threads: 4,
            otel_endpoint: None,
        }
    }
}
