#![allow(dead_code)]

use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, Rgb, RgbImage, Rgba, RgbaImage};
use inference::{
    ContextMetadata, ExecutionContext, InferenceError, InferenceOutput, Model, ModelHandle,
    ModelInput, ModelSpec, Registry, Result,
};
use ndarray::{ArrayD, Axis, IxDyn};
use serde_json::json;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const CONTEXT: &str = "fake";

type Responder = dyn Fn(&ArrayD<f32>) -> Result<InferenceOutput> + Send + Sync;

/// Execution context driven by a closure over each batch row's mean brightness.
pub struct FakeContext {
    respond: Box<Responder>,
    delay: Duration,
    pub runs: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeContext {
    pub fn new(respond: impl Fn(&ArrayD<f32>) -> Result<InferenceOutput> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Three-class probabilities: dark frames vote class 0, bright frames class 2.
    pub fn brightness_classifier() -> Self {
        Self::new(|tensor| {
            let rows: Vec<f32> = row_means(tensor)
                .into_iter()
                .flat_map(|mean| {
                    if mean > 0.5 {
                        [0.05, 0.15, 0.8]
                    } else {
                        [0.7, 0.2, 0.1]
                    }
                })
                .collect();
            let batch = rows.len() / 3;
            Ok(InferenceOutput::new().with("probabilities", ArrayD::from_shape_vec(IxDyn(&[batch, 3]), rows)?))
        })
    }

    /// Unified detection output with three candidates, two of them overlapping.
    pub fn fixed_detector() -> Self {
        Self::new(|_| {
            let rows = vec![
                0.0f32, 0.0, 10.0, 10.0, 0.9, 0.1, //
                1.0, 1.0, 11.0, 11.0, 0.8, 0.1, //
                50.0, 50.0, 60.0, 60.0, 0.1, 0.35,
            ];
            Ok(InferenceOutput::new().with("output", ArrayD::from_shape_vec(IxDyn(&[1, 3, 6]), rows)?))
        })
    }

    /// `[1, 2, 2]` class-id map: three pixels of class 1, one of class 0.
    pub fn fixed_segmenter() -> Self {
        Self::new(|_| {
            Ok(InferenceOutput::new().with(
                "mask",
                ArrayD::from_shape_vec(IxDyn(&[1, 2, 2]), vec![1.0f32, 1.0, 0.0, 1.0])?,
            ))
        })
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(InferenceError::Inference("device lost".to_string())))
    }
}

impl ExecutionContext for FakeContext {
    fn load(&self, path: &Path) -> Result<ModelHandle> {
        Ok(ModelHandle::new("fake", path, ()))
    }

    fn run(&self, handle: &ModelHandle, input: &ModelInput) -> Result<InferenceOutput> {
        handle.session::<()>()?;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = (self.respond)(input.tensors()[0]);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn metadata(&self) -> ContextMetadata {
        ContextMetadata {
            backend_type: "fake".to_string(),
            version: "1.0".to_string(),
            device: "cpu".to_string(),
            accelerator_enabled: false,
            capacity_limit: Some(1),
        }
    }
}

fn row_means(tensor: &ArrayD<f32>) -> Vec<f32> {
    tensor
        .axis_iter(Axis(0))
        .map(|row| row.mean().unwrap_or_default())
        .collect()
}

pub fn spec(id: &str, version: &str, task: serde_json::Value) -> ModelSpec {
    serde_json::from_value(json!({
        "id": id,
        "version": version,
        "model_path": format!("{}.onnx", id),
        "task": task,
        "input_shape": [null, 4, 4, 3],
        "metadata": {"class_labels": ["cat", "dog", "bird"]}
    }))
    .unwrap()
}

/// Registry holding one model bound to `context` under [`CONTEXT`].
pub fn registry_with(spec: ModelSpec, context: FakeContext) -> (Arc<Registry>, Arc<FakeContext>) {
    let registry = Arc::new(Registry::new());
    let context = Arc::new(context);
    registry.register_model(Model::new(spec).unwrap());
    registry.register_context(CONTEXT, context.clone());
    (registry, context)
}

pub fn write_png(dir: &Path, name: &str, value: u8) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(8, 8, Rgb([value, value, value]))
        .save(&path)
        .unwrap();
    path
}

pub fn write_gif(dir: &Path, name: &str, values: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let mut encoder = GifEncoder::new(file);
    let frames = values.iter().map(|&v| {
        let img = RgbaImage::from_pixel(8, 8, Rgba([v, v, v, 255]));
        Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1))
    });
    encoder.encode_frames(frames).unwrap();
    path
}
