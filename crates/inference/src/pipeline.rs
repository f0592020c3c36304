use crate::backend::{ContextMetadata, ExecutionContext};
use crate::error::Result;
use crate::model::{AnalyzeOptions, Model, ModelInfo};
use crate::processing::{AnalysisInput, TaskOutput};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wall-clock seconds spent in each stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Performance {
    pub preprocess_time: f64,
    pub inference_time: f64,
    pub postprocess_time: f64,
    pub total_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextInfo {
    pub name: String,
    #[serde(flatten)]
    pub metadata: ContextMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub model_id: String,
    pub model_version: String,
    pub context: ContextInfo,
    pub performance: Performance,
}

/// Task-specific result keys plus a `metadata` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub output: TaskOutput,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairInfo {
    #[serde(flatten)]
    pub model: ModelInfo,
    pub context: ContextInfo,
}

/// A loaded model bound to the context it runs on.
///
/// Created on demand by [`crate::Registry::create_pair`] and cheap to clone.
#[derive(Clone)]
pub struct ModelContext {
    model: Arc<Model>,
    context_name: String,
    context: Arc<dyn ExecutionContext>,
}

impl fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelContext")
            .field("model", &self.model.key())
            .field("context", &self.context_name)
            .finish()
    }
}

impl ModelContext {
    pub(crate) fn new(
        model: Arc<Model>,
        context_name: &str,
        context: Arc<dyn ExecutionContext>,
    ) -> Self {
        Self {
            model,
            context_name: context_name.to_string(),
            context,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn info(&self) -> PairInfo {
        PairInfo {
            model: self.model.info(),
            context: self.context_info(),
        }
    }

    fn context_info(&self) -> ContextInfo {
        ContextInfo {
            name: self.context_name.clone(),
            metadata: self.context.metadata(),
        }
    }

    /// Run the three stages in order, with decoding and the backend call on
    /// the blocking pool.
    #[tracing::instrument(
        name = "analyze",
        skip_all,
        fields(model = %self.model.key(), context = %self.context_name, input = input.kind())
    )]
    pub async fn analyze(&self, input: AnalysisInput, options: AnalyzeOptions) -> Result<AnalysisResult> {
        let started = Instant::now();

        let model = self.model.clone();
        let span = tracing::Span::current();
        let (prepared, preprocess_time) = tokio::task::spawn_blocking(move || {
            let _e = span.enter();
            timed(|| model.preprocess(&input))
        })
        .await??;

        let model = self.model.clone();
        let span = tracing::Span::current();
        let (predictions, inference_time) = tokio::task::spawn_blocking(move || {
            let _e = span.enter();
            timed(|| model.predict(&prepared))
        })
        .await??;

        let (output, postprocess_time) = timed(|| self.model.postprocess(&predictions, &options))?;

        Ok(self.envelope(output, preprocess_time, inference_time, postprocess_time, started.elapsed()))
    }

    /// Same as [`ModelContext::analyze`] on the calling thread.
    #[tracing::instrument(
        name = "analyze",
        skip_all,
        fields(model = %self.model.key(), context = %self.context_name, input = input.kind())
    )]
    pub fn analyze_blocking(&self, input: &AnalysisInput, options: &AnalyzeOptions) -> Result<AnalysisResult> {
        let started = Instant::now();
        let (prepared, preprocess_time) = timed(|| self.model.preprocess(input))?;
        let (predictions, inference_time) = timed(|| self.model.predict(&prepared))?;
        let (output, postprocess_time) = timed(|| self.model.postprocess(&predictions, options))?;
        Ok(self.envelope(output, preprocess_time, inference_time, postprocess_time, started.elapsed()))
    }

    fn envelope(
        &self,
        output: TaskOutput,
        preprocess: Duration,
        inference: Duration,
        postprocess: Duration,
        total: Duration,
    ) -> AnalysisResult {
        let performance = Performance {
            preprocess_time: preprocess.as_secs_f64(),
            inference_time: inference.as_secs_f64(),
            postprocess_time: postprocess.as_secs_f64(),
            total_time: total.as_secs_f64(),
        };
        tracing::debug!(
            preprocess_ms = performance.preprocess_time * 1e3,
            inference_ms = performance.inference_time * 1e3,
            postprocess_ms = performance.postprocess_time * 1e3,
            total_ms = performance.total_time * 1e3,
            "Analysis complete"
        );

        AnalysisResult {
            output,
            metadata: ResultMetadata {
                model_id: self.model.id().to_string(),
                model_version: self.model.version().to_string(),
                context: self.context_info(),
                performance,
            },
        }
    }
}

fn timed<T>(stage: impl FnOnce() -> Result<T>) -> Result<(T, Duration)> {
    let start = Instant::now();
    let value = stage()?;
    Ok((value, start.elapsed()))
}
