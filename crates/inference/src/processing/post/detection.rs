use super::class_name;
use crate::error::{InferenceError, Result};
use crate::model::{DetectionConfig, DetectionFormat};
use crate::tensor::InferenceOutput;
use ndarray::{ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use serde::Serialize;

pub const BOXES: &str = "detection_boxes";
pub const SCORES: &str = "detection_scores";
pub const CLASSES: &str = "detection_classes";
pub const NUM_DETECTIONS: &str = "num_detections";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Corner coordinates `[x1, y1, x2, y2]` in the model's coordinate space.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: usize,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub count: usize,
}

/// Box, best class and best score extracted from one raw candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: usize,
}

impl Candidate {
    pub fn area(&self) -> f32 {
        let [x1, y1, x2, y2] = self.bbox;
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    pub fn iou(&self, other: &Candidate) -> f32 {
        let x1 = self.bbox[0].max(other.bbox[0]);
        let y1 = self.bbox[1].max(other.bbox[1]);
        let x2 = self.bbox[2].min(other.bbox[2]);
        let y2 = self.bbox[3].min(other.bbox[3]);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

pub struct DetectionPostProcessor<'a> {
    labels: &'a [String],
    config: DetectionConfig,
}

impl<'a> DetectionPostProcessor<'a> {
    pub fn new(labels: &'a [String], config: DetectionConfig) -> Self {
        Self { labels, config }
    }

    #[tracing::instrument(skip_all, fields(format = ?self.config.output_format))]
    pub fn process(&self, output: &InferenceOutput) -> Result<DetectionResult> {
        let candidates = match self.config.output_format {
            DetectionFormat::Unified => decode_unified(output)?,
            DetectionFormat::Ssd => decode_ssd(output)?,
            DetectionFormat::FasterRcnn => decode_faster_rcnn(output)?,
            DetectionFormat::Yolo => decode_yolo(output)?,
        };
        let raw = candidates.len();

        let threshold = self.config.confidence_threshold;
        let confident: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.score >= threshold)
            .collect();

        let kept = if self.config.apply_nms {
            non_max_suppression(
                confident,
                self.config.iou_threshold,
                self.config.max_detections,
                self.config.class_agnostic_nms,
            )
        } else {
            let mut kept = confident;
            kept.truncate(self.config.max_detections);
            kept
        };

        tracing::debug!(raw, kept = kept.len(), threshold, "Detections decoded");

        let detections: Vec<Detection> = kept
            .into_iter()
            .map(|c| Detection {
                bbox: c.bbox,
                score: c.score,
                class_id: c.class_id,
                class_name: class_name(self.labels, c.class_id),
            })
            .collect();

        Ok(DetectionResult {
            count: detections.len(),
            detections,
        })
    }
}

/// Greedy NMS: repeatedly keep the highest-scoring box and drop the rest that
/// overlap it by more than `iou_threshold`. Output is sorted by score.
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
    class_agnostic: bool,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; candidates.len()];
    let mut kept = Vec::new();

    for i in 0..candidates.len() {
        if kept.len() >= max_detections {
            break;
        }
        if suppressed[i] {
            continue;
        }
        let best = candidates[i];
        kept.push(best);

        for (j, other) in candidates.iter().enumerate().skip(i + 1) {
            if suppressed[j] || (!class_agnostic && other.class_id != best.class_id) {
                continue;
            }
            if best.iou(other) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    kept
}

/// View a tensor as 2-D, dropping a leading batch dimension of 1.
fn rows<'a>(tensor: &'a ArrayD<f32>, name: &str) -> Result<ArrayView2<'a, f32>> {
    let view = match tensor.ndim() {
        2 => tensor.view(),
        3 if tensor.shape()[0] == 1 => tensor.index_axis(Axis(0), 0),
        _ => return Err(shape_error(name, tensor, "[1, N, K] or [N, K]")),
    };
    view.into_dimensionality::<Ix2>()
        .map_err(|_| shape_error(name, tensor, "[1, N, K] or [N, K]"))
}

/// View a tensor as 1-D, dropping a leading batch dimension of 1.
fn column<'a>(tensor: &'a ArrayD<f32>, name: &str) -> Result<ArrayView1<'a, f32>> {
    let view = match tensor.ndim() {
        1 => tensor.view(),
        2 if tensor.shape()[0] == 1 => tensor.index_axis(Axis(0), 0),
        _ => return Err(shape_error(name, tensor, "[1, N] or [N]")),
    };
    view.into_dimensionality::<Ix1>()
        .map_err(|_| shape_error(name, tensor, "[1, N] or [N]"))
}

fn shape_error(name: &str, tensor: &ArrayD<f32>, expected: &str) -> InferenceError {
    InferenceError::Inference(format!(
        "output '{}' has shape {:?}, expected {}",
        name,
        tensor.shape(),
        expected
    ))
}

fn argmax(scores: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    scores.enumerate().fold(None, |best, (i, s)| match best {
        Some((_, b)) if b >= s => best,
        _ => Some((i, s)),
    })
}

fn count(tensor: Option<&ArrayD<f32>>, available: usize) -> usize {
    tensor
        .and_then(|t| t.iter().next().copied())
        .map(|n| (n.max(0.0) as usize).min(available))
        .unwrap_or(available)
}

/// `[1, N, 4 + C]`: corner box then one score per class.
fn decode_unified(output: &InferenceOutput) -> Result<Vec<Candidate>> {
    let tensor = output.first()?;
    let table = rows(tensor, "output")?;
    if table.ncols() <= 4 {
        return Err(shape_error("output", tensor, "[1, N, 4 + C] with C >= 1"));
    }

    Ok(table
        .outer_iter()
        .filter_map(|row| {
            let (class_id, score) = argmax(row.iter().skip(4).copied())?;
            Some(Candidate {
                bbox: [row[0], row[1], row[2], row[3]],
                score,
                class_id,
            })
        })
        .collect())
}

/// `[1, 4 + C, N]`: center box `(cx, cy, w, h)` then class scores, channels first.
fn decode_yolo(output: &InferenceOutput) -> Result<Vec<Candidate>> {
    let tensor = output.first()?;
    let table = rows(tensor, "output")?;
    if table.nrows() <= 4 {
        return Err(shape_error("output", tensor, "[1, 4 + C, N] with C >= 1"));
    }

    Ok(table
        .columns()
        .into_iter()
        .filter_map(|col| {
            let (class_id, score) = argmax(col.iter().skip(4).copied())?;
            let (x1, y1, x2, y2) = cxcywh_to_xyxy(col[0], col[1], col[2], col[3]);
            Some(Candidate {
                bbox: [x1, y1, x2, y2],
                score,
                class_id,
            })
        })
        .collect())
}

/// Positional `boxes [1, N, 4]`, `scores [1, N]`, `classes [1, N]`, `count [1]`.
fn decode_ssd(output: &InferenceOutput) -> Result<Vec<Candidate>> {
    if output.len() < 3 {
        return Err(InferenceError::Inference(format!(
            "SSD output needs boxes, scores and classes tensors, got {}",
            output.len()
        )));
    }
    let missing = || InferenceError::Inference("SSD output tensor missing".to_string());
    decode_multi_tensor(
        output.at(0).ok_or_else(missing)?,
        output.at(1).ok_or_else(missing)?,
        output.at(2).ok_or_else(missing)?,
        output.at(3),
    )
}

/// Named `detection_boxes`, `detection_scores`, `detection_classes`, `num_detections`.
fn decode_faster_rcnn(output: &InferenceOutput) -> Result<Vec<Candidate>> {
    decode_multi_tensor(
        output.require(BOXES)?,
        output.require(SCORES)?,
        output.require(CLASSES)?,
        output.get(NUM_DETECTIONS),
    )
}

fn decode_multi_tensor(
    boxes: &ArrayD<f32>,
    scores: &ArrayD<f32>,
    classes: &ArrayD<f32>,
    num: Option<&ArrayD<f32>>,
) -> Result<Vec<Candidate>> {
    let boxes = rows(boxes, BOXES)?;
    let scores = column(scores, SCORES)?;
    let classes = column(classes, CLASSES)?;

    if boxes.ncols() != 4 {
        return Err(InferenceError::Inference(format!(
            "boxes must have 4 coordinates, got {}",
            boxes.ncols()
        )));
    }
    let available = boxes.nrows().min(scores.len()).min(classes.len());
    let n = count(num, available);

    Ok((0..n)
        .map(|i| Candidate {
            bbox: [boxes[[i, 0]], boxes[[i, 1]], boxes[[i, 2]], boxes[[i, 3]]],
            score: scores[i],
            class_id: classes[i].max(0.0).round() as usize,
        })
        .collect())
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn, array};

    /// Build a unified `[1, N, 4 + C]` tensor from `(box, class scores)` rows.
    fn unified(rows: &[([f32; 4], Vec<f32>)]) -> InferenceOutput {
        let width = 4 + rows[0].1.len();
        let data: Vec<f32> = rows
            .iter()
            .flat_map(|(b, scores)| b.iter().chain(scores.iter()).copied().collect::<Vec<_>>())
            .collect();
        InferenceOutput::new().with(
            "output",
            Array::from_shape_vec(IxDyn(&[1, rows.len(), width]), data).unwrap(),
        )
    }

    fn config(threshold: f32) -> DetectionConfig {
        DetectionConfig {
            confidence_threshold: threshold,
            ..Default::default()
        }
    }

    fn candidate(bbox: [f32; 4], score: f32, class_id: usize) -> Candidate {
        Candidate {
            bbox,
            score,
            class_id,
        }
    }

    #[test]
    fn test_confidence_filtering() {
        let output = unified(&[
            ([0.0, 0.0, 10.0, 10.0], vec![0.9, 0.1]),
            ([20.0, 20.0, 30.0, 30.0], vec![0.2, 0.3]),
            ([40.0, 40.0, 50.0, 50.0], vec![0.1, 0.6]),
        ]);
        let labels = vec!["person".to_string(), "car".to_string()];

        // Best scores are 0.9, 0.3 and 0.6 on disjoint boxes.
        for (threshold, expected) in [(0.0, 3), (0.25, 3), (0.5, 2), (0.75, 1), (1.0, 0)] {
            let processor = DetectionPostProcessor::new(&labels, config(threshold));
            let result = processor.process(&output).unwrap();

            assert_eq!(result.count, expected, "threshold {}", threshold);
            assert!(
                result.detections.iter().all(|d| d.score >= threshold),
                "No detection below {} should survive",
                threshold
            );
        }

        let processor = DetectionPostProcessor::new(&labels, config(0.5));
        let result = processor.process(&output).unwrap();
        assert_eq!(result.detections[0].class_name, "person");
        assert_eq!(result.detections[1].class_name, "car");
        assert_eq!(result.detections[1].bbox, [40.0, 40.0, 50.0, 50.0]);
    }

    #[test]
    fn test_score_equal_to_threshold_kept() {
        let output = unified(&[([0.0, 0.0, 1.0, 1.0], vec![0.5])]);
        let processor = DetectionPostProcessor::new(&[], config(0.5));
        assert_eq!(processor.process(&output).unwrap().count, 1);
    }

    #[test]
    fn test_same_class_nms_keeps_highest() {
        let output = unified(&[
            ([0.0, 0.0, 10.0, 10.0], vec![0.8]),
            ([1.0, 1.0, 11.0, 11.0], vec![0.95]),
        ]);
        let processor = DetectionPostProcessor::new(&[], config(0.5));

        let result = processor.process(&output).unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.detections[0].score, 0.95);
        assert_eq!(result.detections[0].class_name, "class_0");
    }

    #[test]
    fn test_nms_disabled_keeps_overlaps() {
        let output = unified(&[
            ([0.0, 0.0, 10.0, 10.0], vec![0.8]),
            ([1.0, 1.0, 11.0, 11.0], vec![0.95]),
        ]);
        let processor = DetectionPostProcessor::new(
            &[],
            DetectionConfig {
                apply_nms: false,
                ..config(0.5)
            },
        );
        assert_eq!(processor.process(&output).unwrap().count, 2);
    }

    #[test]
    fn test_class_aware_nms_keeps_other_classes() {
        let boxes = vec![
            candidate([0.0, 0.0, 10.0, 10.0], 0.9, 0),
            candidate([0.0, 0.0, 10.0, 10.0], 0.8, 1),
        ];
        assert_eq!(non_max_suppression(boxes.clone(), 0.5, 100, false).len(), 2);
        assert_eq!(non_max_suppression(boxes, 0.5, 100, true).len(), 1);
    }

    #[test]
    fn test_nms_caps_at_max_detections() {
        let boxes: Vec<Candidate> = (0..10)
            .map(|i| {
                let x = i as f32 * 20.0;
                candidate([x, 0.0, x + 10.0, 10.0], 0.5 + i as f32 * 0.01, 0)
            })
            .collect();
        let kept = non_max_suppression(boxes, 0.5, 3, true);
        assert_eq!(kept.len(), 3);
        assert!(kept[0].score > kept[1].score && kept[1].score > kept[2].score);
    }

    #[test]
    fn test_nms_suppression_is_strictly_greater_than_threshold() {
        // IoU of these two boxes is exactly 1/3.
        let boxes = vec![
            candidate([0.0, 0.0, 2.0, 1.0], 0.9, 0),
            candidate([1.0, 0.0, 3.0, 1.0], 0.8, 0),
        ];
        assert_eq!(non_max_suppression(boxes.clone(), 1.0 / 3.0, 100, true).len(), 2);
        assert_eq!(non_max_suppression(boxes, 0.3, 100, true).len(), 1);
    }

    #[test]
    fn test_iou_of_disjoint_and_degenerate_boxes() {
        let a = candidate([0.0, 0.0, 1.0, 1.0], 1.0, 0);
        let b = candidate([5.0, 5.0, 6.0, 6.0], 1.0, 0);
        let empty = candidate([2.0, 2.0, 2.0, 2.0], 1.0, 0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(empty.iou(&empty), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ssd_positional_outputs_respect_count() {
        let output = InferenceOutput::new()
            .with(
                "boxes",
                array![[[0.1f32, 0.1, 0.2, 0.2], [0.5, 0.5, 0.9, 0.9], [0.0, 0.0, 0.0, 0.0]]]
                    .into_dyn(),
            )
            .with("scores", array![[0.9f32, 0.7, 0.99]].into_dyn())
            .with("classes", array![[3.0f32, 1.0, 2.0]].into_dyn())
            .with("num", array![2.0f32].into_dyn());
        let processor = DetectionPostProcessor::new(
            &[],
            DetectionConfig {
                output_format: DetectionFormat::Ssd,
                ..config(0.5)
            },
        );

        let result = processor.process(&output).unwrap();

        assert_eq!(result.count, 2, "Padding rows past num_detections are ignored");
        assert_eq!(result.detections[0].class_id, 3);
        assert_eq!(result.detections[1].class_id, 1);
    }

    #[test]
    fn test_faster_rcnn_named_outputs() {
        let output = InferenceOutput::new()
            .with(NUM_DETECTIONS, array![1.0f32].into_dyn())
            .with(SCORES, array![[0.8f32, 0.6]].into_dyn())
            .with(CLASSES, array![[7.0f32, 2.0]].into_dyn())
            .with(
                BOXES,
                array![[[1.0f32, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]].into_dyn(),
            );
        let processor = DetectionPostProcessor::new(
            &[],
            DetectionConfig {
                output_format: DetectionFormat::FasterRcnn,
                ..config(0.5)
            },
        );

        let result = processor.process(&output).unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.detections[0].bbox, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(result.detections[0].class_id, 7);
    }

    #[test]
    fn test_faster_rcnn_missing_tensor_named_in_error() {
        let output = InferenceOutput::new().with(BOXES, ArrayD::zeros(IxDyn(&[1, 0, 4])));
        let processor = DetectionPostProcessor::new(
            &[],
            DetectionConfig {
                output_format: DetectionFormat::FasterRcnn,
                ..config(0.5)
            },
        );
        let err = processor.process(&output).unwrap_err();
        assert!(err.to_string().contains(SCORES), "got: {}", err);
    }

    #[test]
    fn test_yolo_center_boxes_converted() {
        // Two anchors, one class: [1, 5, 2]
        let output = InferenceOutput::new().with(
            "output0",
            array![[
                [50.0f32, 10.0],
                [50.0, 10.0],
                [20.0, 4.0],
                [10.0, 4.0],
                [0.9, 0.1]
            ]]
            .into_dyn(),
        );
        let processor = DetectionPostProcessor::new(
            &[],
            DetectionConfig {
                output_format: DetectionFormat::Yolo,
                ..config(0.5)
            },
        );

        let result = processor.process(&output).unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.detections[0].bbox, [40.0, 45.0, 60.0, 55.0]);
    }

    #[test]
    fn test_unified_without_class_columns_rejected() {
        let output = InferenceOutput::new().with("output", ArrayD::zeros(IxDyn(&[1, 3, 4])));
        let processor = DetectionPostProcessor::new(&[], config(0.5));
        assert!(processor.process(&output).is_err());
    }

    #[test]
    fn test_empty_detections() {
        let output = InferenceOutput::new().with("output", ArrayD::zeros(IxDyn(&[1, 0, 6])));
        let processor = DetectionPostProcessor::new(&[], config(0.5));
        let result = processor.process(&output).unwrap();
        assert_eq!(result.count, 0);
        assert!(result.detections.is_empty());
    }

    #[test]
    fn test_cxcywh_to_xyxy() {
        let (x1, y1, x2, y2) = cxcywh_to_xyxy(0.5, 0.5, 0.2, 0.4);
        assert!((x1 - 0.4).abs() < 1e-6);
        assert!((y1 - 0.3).abs() < 1e-6);
        assert!((x2 - 0.6).abs() < 1e-6);
        assert!((y2 - 0.7).abs() < 1e-6);
    }
}
