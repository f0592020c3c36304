//! Temporal aggregation of per-frame results into video-level conclusions.

use super::classification::ClassificationResult;
use super::detection::{Detection, DetectionResult};
use super::segmentation::SegmentationResult;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationAggregate {
    /// Class with the most frame votes; ties go to the class seen first.
    pub top_class: Option<String>,
    pub top_class_frames: usize,
    pub top_class_confidence: f32,
    /// Fraction of frames voting for each class.
    pub class_distribution: BTreeMap<String, f32>,
    pub class_avg_confidence: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameDetection {
    pub frame_id: usize,
    #[serde(flatten)]
    pub detection: Detection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionAggregate {
    pub class_counts: BTreeMap<String, usize>,
    pub total_detections: usize,
    pub unique_classes_detected: usize,
    pub avg_detections_per_frame: f32,
    pub max_detections_in_frame: usize,
    /// Fraction of frames with at least one detection.
    pub detection_consistency: f32,
    pub all_detections: Vec<FrameDetection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationAggregate {
    /// Pixel-weighted mean percentage per class across all frames.
    pub average_class_distribution: BTreeMap<String, f32>,
    pub per_frame_dominant_class: BTreeMap<String, usize>,
    /// Most frequent per-frame dominant class; ties go to the earliest frame.
    pub frame_dominant_class: Option<String>,
    /// Class with the largest average area.
    pub area_dominant_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VideoAggregate {
    Classification(ClassificationAggregate),
    Detection(DetectionAggregate),
    Segmentation(SegmentationAggregate),
}

/// Counts keyed by first appearance, so ties resolve to the earliest entry.
#[derive(Default)]
struct Tally {
    order: Vec<String>,
    counts: BTreeMap<String, (usize, f32)>,
}

impl Tally {
    fn add(&mut self, key: &str, value: f32) {
        let entry = self.counts.entry(key.to_string()).or_insert_with(|| {
            self.order.push(key.to_string());
            (0, 0.0)
        });
        entry.0 += 1;
        entry.1 += value;
    }

    fn leader(&self) -> Option<(&str, usize, f32)> {
        let mut best: Option<(&str, usize, f32)> = None;
        for key in &self.order {
            let (count, sum) = self.counts[key];
            if best.is_none_or(|(_, c, _)| count > c) {
                best = Some((key.as_str(), count, sum));
            }
        }
        best
    }
}

pub fn aggregate_classification(frames: &[ClassificationResult]) -> ClassificationAggregate {
    let mut tally = Tally::default();
    for frame in frames {
        tally.add(&frame.top_class, frame.top_confidence);
    }

    let total = frames.len().max(1) as f32;
    let class_distribution = tally
        .counts
        .iter()
        .map(|(k, (count, _))| (k.clone(), *count as f32 / total))
        .collect();
    let class_avg_confidence = tally
        .counts
        .iter()
        .map(|(k, (count, sum))| (k.clone(), sum / *count as f32))
        .collect();

    let (top_class, top_class_frames, top_class_confidence) = match tally.leader() {
        Some((class, count, sum)) => (Some(class.to_string()), count, sum / count as f32),
        None => (None, 0, 0.0),
    };

    ClassificationAggregate {
        top_class,
        top_class_frames,
        top_class_confidence,
        class_distribution,
        class_avg_confidence,
    }
}

pub fn aggregate_detection(frames: &[DetectionResult]) -> DetectionAggregate {
    let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut all_detections = Vec::new();
    let mut frames_with_detections = 0usize;
    let mut max_detections_in_frame = 0usize;

    for (frame_id, frame) in frames.iter().enumerate() {
        if frame.count > 0 {
            frames_with_detections += 1;
        }
        max_detections_in_frame = max_detections_in_frame.max(frame.count);
        for detection in &frame.detections {
            *class_counts.entry(detection.class_name.clone()).or_default() += 1;
            all_detections.push(FrameDetection {
                frame_id,
                detection: detection.clone(),
            });
        }
    }

    let total_detections = all_detections.len();
    let frame_count = frames.len().max(1) as f32;

    DetectionAggregate {
        unique_classes_detected: class_counts.len(),
        class_counts,
        total_detections,
        avg_detections_per_frame: total_detections as f32 / frame_count,
        max_detections_in_frame,
        detection_consistency: frames_with_detections as f32 / frame_count,
        all_detections,
    }
}

pub fn aggregate_segmentation(frames: &[SegmentationResult]) -> SegmentationAggregate {
    let mut dominant = Tally::default();
    let mut weighted: BTreeMap<String, f64> = BTreeMap::new();
    let mut total_pixels = 0usize;

    for frame in frames {
        if let Some(class) = &frame.dominant_class {
            dominant.add(class, 0.0);
        }
        let pixels = frame.pixel_count();
        total_pixels += pixels;
        for (class, pct) in &frame.class_distribution {
            *weighted.entry(class.clone()).or_default() += f64::from(*pct) * pixels as f64;
        }
    }

    let average_class_distribution: BTreeMap<String, f32> = weighted
        .into_iter()
        .map(|(class, sum)| (class, (sum / total_pixels.max(1) as f64) as f32))
        .collect();

    let area_dominant_class = average_class_distribution
        .iter()
        .fold(None, |best: Option<(&String, f32)>, (class, &pct)| match best {
            Some((_, b)) if b >= pct => best,
            _ => Some((class, pct)),
        })
        .map(|(class, _)| class.clone());

    SegmentationAggregate {
        frame_dominant_class: dominant.leader().map(|(class, _, _)| class.to_string()),
        per_frame_dominant_class: dominant
            .counts
            .iter()
            .map(|(k, (count, _))| (k.clone(), *count))
            .collect(),
        average_class_distribution,
        area_dominant_class,
    }
}
