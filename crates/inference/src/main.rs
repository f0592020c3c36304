use anyhow::Context as _;
use clap::Parser;
use common::{TelemetryGuard, setup_logging};
use inference::{
    AnalysisConfig, AnalysisRequest, AnalyzeOptions, FileTaskStore, LATEST, ModelCatalog,
    Registry, TaskManager, bootstrap_contexts,
};
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(not(any(feature = "ort-backend", feature = "tract-backend")))]
compile_error!("At least one backend feature must be enabled: 'ort-backend' or 'tract-backend'");

#[derive(Parser, Debug)]
#[command(name = "inference", version, about = "Analyze images and videos with registered models")]
struct Args {
    /// Image or video files to analyze
    files: Vec<PathBuf>,

    /// Model id from the catalog
    #[arg(short, long, default_value = "generic_classifier")]
    model: String,

    /// Model version, or "latest"
    #[arg(long, default_value = LATEST)]
    version: String,

    /// Execution context name (defaults to DEFAULT_CONTEXT)
    #[arg(short, long)]
    context: Option<String>,

    /// Override the detection confidence threshold
    #[arg(long)]
    confidence: Option<f32>,

    /// List registered models and contexts, then exit
    #[arg(long)]
    list: bool,

    /// Submit background tasks and wait for their records
    #[arg(long = "async")]
    background: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AnalysisConfig::from_env()?;

    let telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init("inference", endpoint, config.environment))
        .transpose()?;
    if telemetry.is_none() {
        setup_logging(config.environment)?;
    }

    tracing::info!(config = ?config, "Loaded configuration");

    let registry = Arc::new(Registry::new());
    bootstrap_contexts(&registry, &config);
    let catalog = ModelCatalog::from_path(&config.catalog_path)?;
    let count = catalog.register_all(&registry, &config.models_dir)?;
    tracing::info!(models = count, catalog = %config.catalog_path.display(), "Catalog loaded");

    if args.list {
        let listing = serde_json::json!({
            "models": registry.list_models(),
            "contexts": registry.list_contexts(),
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if args.files.is_empty() {
        anyhow::bail!("No input files given (use --list to see available models)");
    }

    let store = Arc::new(FileTaskStore::open(&config.results_dir)?);
    let manager = TaskManager::new(registry, store, config.task_settings());
    let context = args.context.unwrap_or_else(|| config.default_context.clone());

    let requests = args.files.iter().map(|path| AnalysisRequest {
        model_id: args.model.clone(),
        model_version: args.version.clone(),
        context_name: context.clone(),
        file_path: path.clone(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        options: AnalyzeOptions {
            confidence_threshold: args.confidence,
        },
        // Never delete files the user pointed us at.
        cleanup_input: false,
    });

    if args.background {
        let mut submitted = Vec::new();
        for request in requests {
            let task = manager.submit(request)?;
            tracing::info!(task_id = %task.ack.task_id, "Submitted");
            submitted.push(task);
        }
        for task in submitted {
            let record = task.wait().await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    } else {
        for request in requests {
            let path = request.file_path.clone();
            let record = manager
                .analyze_now(request)
                .await
                .with_context(|| format!("Failed to analyze {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}
