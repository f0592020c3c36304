use crate::Environment;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;

/// Inference timings are exported on this cadence.
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Global OTLP exporters for spans and inference metrics.
///
/// Both providers are flushed on drop, so keep the guard alive for the whole process:
///
/// ```ignore
/// let _telemetry = TelemetryGuard::init("inference", "http://localhost:4317", Environment::Production)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Installs the exporters and the tracing subscriber that feeds them.
    ///
    /// Use instead of [`crate::setup_logging`], never both.
    pub fn init(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let resource = service_resource(service_name, environment);

        let tracer_provider = tracer_provider(endpoint, resource.clone())?;
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = meter_provider(endpoint, resource)?;
        global::set_meter_provider(meter_provider.clone());

        let tracer = global::tracer(service_name.to_string());
        crate::logging::install(
            environment,
            tracing_opentelemetry::layer().with_tracer(tracer),
        )?;
        tracing::info!(service_name, endpoint, "Exporting traces and metrics over OTLP");

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // The subscriber may already be gone here.
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Tracer provider shutdown failed: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Meter provider shutdown failed: {:?}", e);
        }
    }
}

fn service_resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

fn tracer_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();
    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

/// Enters an info-level span for the rest of the scope.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
    ($name:literal, $($fields:tt)+) => {
        tracing::info_span!($name, $($fields)+).entered()
    };
}

/// Enters a debug-level span for the rest of the scope; used inside hot loops.
#[macro_export]
macro_rules! span_debug {
    ($name:literal) => {
        tracing::debug_span!($name).entered()
    };
    ($name:literal, $($fields:tt)+) => {
        tracing::debug_span!($name, $($fields)+).entered()
    };
}
