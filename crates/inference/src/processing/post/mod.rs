pub mod classification;
pub mod detection;
pub mod segmentation;
pub mod video;

use crate::error::Result;
use crate::model::{AnalyzeOptions, TaskSpec, validate_unit};
use crate::tensor::InferenceOutput;
use classification::{ClassificationPostProcessor, ClassificationResult};
use detection::{DetectionPostProcessor, DetectionResult};
use segmentation::{SegmentationPostProcessor, SegmentationResult};
use serde::Serialize;
use video::VideoAggregate;

/// Label for a class id, falling back to `class_<id>`.
pub(crate) fn class_name(labels: &[String], class_id: usize) -> String {
    labels
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// Result for one image or frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FrameOutput {
    Classification(ClassificationResult),
    Detection(DetectionResult),
    Segmentation(SegmentationResult),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    pub frame_id: usize,
    #[serde(flatten)]
    pub output: FrameOutput,
}

/// Where a frame sequence came from and how it was sampled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceInfo {
    pub total_frames: usize,
    pub processed_frames: usize,
    pub frame_interval: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoResult {
    pub frames: Vec<FrameResult>,
    pub aggregated: VideoAggregate,
    pub video_info: SequenceInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutput {
    Single(FrameOutput),
    Video(VideoResult),
}

/// Task-dispatching post-processor for one request.
pub struct PostProcessor<'a> {
    task: &'a TaskSpec,
    labels: &'a [String],
    options: &'a AnalyzeOptions,
}

impl<'a> PostProcessor<'a> {
    pub fn new(task: &'a TaskSpec, labels: &'a [String], options: &'a AnalyzeOptions) -> Result<Self> {
        if let Some(threshold) = options.confidence_threshold {
            validate_unit("confidence_threshold", threshold)?;
        }
        Ok(Self {
            task,
            labels,
            options,
        })
    }

    pub fn process_single(&self, output: &InferenceOutput) -> Result<FrameOutput> {
        Ok(match self.task {
            TaskSpec::Classification(c) | TaskSpec::VideoClassification(c) => {
                FrameOutput::Classification(
                    ClassificationPostProcessor::new(self.labels, c.top_k).process(output)?,
                )
            }
            TaskSpec::Detection(d) => {
                let mut config = d.clone();
                if let Some(threshold) = self.options.confidence_threshold {
                    config.confidence_threshold = threshold;
                }
                FrameOutput::Detection(DetectionPostProcessor::new(self.labels, config).process(output)?)
            }
            TaskSpec::Segmentation(s) => FrameOutput::Segmentation(
                SegmentationPostProcessor::new(self.labels, s.channels_last).process(output)?,
            ),
        })
    }

    /// Process each frame in order, then aggregate across frames.
    #[tracing::instrument(skip_all, fields(frames = outputs.len()))]
    pub fn process_frames(&self, outputs: &[InferenceOutput], info: SequenceInfo) -> Result<VideoResult> {
        let results = outputs
            .iter()
            .map(|o| self.process_single(o))
            .collect::<Result<Vec<_>>>()?;

        let aggregated = match self.task {
            TaskSpec::Classification(_) | TaskSpec::VideoClassification(_) => {
                VideoAggregate::Classification(video::aggregate_classification(
                    &collect(&results, |r| match r {
                        FrameOutput::Classification(c) => Some(c),
                        _ => None,
                    }),
                ))
            }
            TaskSpec::Detection(_) => VideoAggregate::Detection(video::aggregate_detection(
                &collect(&results, |r| match r {
                    FrameOutput::Detection(d) => Some(d),
                    _ => None,
                }),
            )),
            TaskSpec::Segmentation(_) => {
                VideoAggregate::Segmentation(video::aggregate_segmentation(&collect(
                    &results,
                    |r| match r {
                        FrameOutput::Segmentation(s) => Some(s),
                        _ => None,
                    },
                )))
            }
        };

        Ok(VideoResult {
            frames: results
                .into_iter()
                .enumerate()
                .map(|(frame_id, output)| FrameResult { frame_id, output })
                .collect(),
            aggregated,
            video_info: info,
        })
    }
}

fn collect<T: Clone>(results: &[FrameOutput], pick: impl Fn(&FrameOutput) -> Option<&T>) -> Vec<T> {
    results.iter().filter_map(pick).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassificationConfig, DetectionConfig};
    use ndarray::array;

    fn info(n: usize) -> SequenceInfo {
        SequenceInfo {
            total_frames: n,
            processed_frames: n,
            frame_interval: 1,
            fps: None,
        }
    }

    #[test]
    fn test_label_fallback() {
        let labels = vec!["cat".to_string()];
        assert_eq!(class_name(&labels, 0), "cat");
        assert_eq!(class_name(&labels, 4), "class_4");
    }

    #[test]
    fn test_confidence_override_applies_to_detection() {
        let task = TaskSpec::Detection(DetectionConfig::default());
        let output = InferenceOutput::new().with(
            "output",
            array![[[0.0f32, 0.0, 1.0, 1.0, 0.3]]].into_dyn(),
        );

        let default_options = AnalyzeOptions::default();
        let processor = PostProcessor::new(&task, &[], &default_options).unwrap();
        let FrameOutput::Detection(result) = processor.process_single(&output).unwrap() else {
            panic!("expected detection output");
        };
        assert_eq!(result.count, 0);

        let lowered = AnalyzeOptions {
            confidence_threshold: Some(0.2),
        };
        let processor = PostProcessor::new(&task, &[], &lowered).unwrap();
        let FrameOutput::Detection(result) = processor.process_single(&output).unwrap() else {
            panic!("expected detection output");
        };
        assert_eq!(result.count, 1);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let task = TaskSpec::Detection(DetectionConfig::default());
        let options = AnalyzeOptions {
            confidence_threshold: Some(1.2),
        };
        assert!(PostProcessor::new(&task, &[], &options).is_err());
    }

    #[test]
    fn test_frames_keep_order_and_ids() {
        let task = TaskSpec::VideoClassification(ClassificationConfig::default());
        let options = AnalyzeOptions::default();
        let processor = PostProcessor::new(&task, &[], &options).unwrap();
        let outputs: Vec<InferenceOutput> = [0usize, 2, 2]
            .iter()
            .map(|&hot| {
                let mut row = vec![0.0f32; 3];
                row[hot] = 1.0;
                InferenceOutput::new().with("probs", ndarray::Array::from_vec(row).into_dyn())
            })
            .collect();

        let video = processor.process_frames(&outputs, info(3)).unwrap();

        let ids: Vec<usize> = video.frames.iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let VideoAggregate::Classification(aggregate) = &video.aggregated else {
            panic!("expected classification aggregate");
        };
        assert_eq!(aggregate.top_class.as_deref(), Some("class_2"));
        assert_eq!(aggregate.top_class_frames, 2);

        let json = serde_json::to_value(&video).unwrap();
        assert_eq!(json["frames"][1]["frame_id"], 1);
        assert_eq!(json["frames"][1]["top_class"], "class_2");
        assert_eq!(json["video_info"]["processed_frames"], 3);
    }
}
