use crate::config::Environment;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::Layered, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Default filter used when `RUST_LOG` is not set. ONNX Runtime is chatty at info.
pub const DEFAULT_FILTER: &str = "info,ort=warn";

/// Initialize the tracing subscriber: pretty output for development, JSON for production.
///
/// An OpenTelemetry layer is always attached; spans are only exported once a global
/// tracer provider exists (see [`crate::TelemetryGuard`]).
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_logging(environment: Environment) -> anyhow::Result<()> {
    install(environment, tracing_opentelemetry::layer())
}

pub(crate) fn install<L>(environment: Environment, otel_layer: L) -> anyhow::Result<()>
where
    L: Layer<Layered<EnvFilter, Registry>> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init()?,
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init()?,
    }

    Ok(())
}
