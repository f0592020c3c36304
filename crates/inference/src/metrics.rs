use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::time::Duration;

/// How an analysis was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sync,
    Async,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

#[derive(Clone)]
pub struct AnalysisMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    failures: Counter<u64>,
}

impl AnalysisMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
        ];
        Self {
            duration: meter
                .f64_histogram("analysis_duration_seconds")
                .with_description("Time to analyze one request (preprocess + infer + postprocess)")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            requests: meter
                .u64_counter("analysis_requests_total")
                .with_description("Total analysis requests")
                .build(),
            failures: meter
                .u64_counter("analysis_failures_total")
                .with_description("Total failed analysis requests")
                .build(),
        }
    }

    pub fn record(&self, model_id: &str, mode: Mode, elapsed: Duration, succeeded: bool) {
        let labels = [
            KeyValue::new("model_id", model_id.to_string()),
            KeyValue::new("mode", mode.as_str()),
        ];
        self.requests.add(1, &labels);
        self.duration.record(elapsed.as_secs_f64(), &labels);
        if !succeeded {
            self.failures.add(1, &labels);
        }
    }
}
