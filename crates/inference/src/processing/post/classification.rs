use super::class_name;
use crate::error::{InferenceError, Result};
use crate::tensor::InferenceOutput;
use ndarray::Axis;
use serde::Serialize;

const STOCHASTIC_TOLERANCE: f32 = 1e-5;
const BINARY_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassPrediction {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub top_class: String,
    pub top_class_id: usize,
    pub top_confidence: f32,
    /// Ranked by confidence, highest first.
    pub predictions: Vec<ClassPrediction>,
    /// Set for binary models only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_positive: Option<bool>,
}

pub struct ClassificationPostProcessor<'a> {
    labels: &'a [String],
    top_k: usize,
}

impl<'a> ClassificationPostProcessor<'a> {
    pub fn new(labels: &'a [String], top_k: usize) -> Self {
        Self { labels, top_k }
    }

    #[tracing::instrument(skip_all)]
    pub fn process(&self, output: &InferenceOutput) -> Result<ClassificationResult> {
        let tensor = output.first()?;
        let row: Vec<f32> = match tensor.ndim() {
            0 => vec![tensor.iter().copied().next().unwrap_or_default()],
            1 => tensor.iter().copied().collect(),
            _ => tensor.index_axis(Axis(0), 0).iter().copied().collect(),
        };

        match row.len() {
            0 => Err(InferenceError::Inference(
                "classification output is empty".to_string(),
            )),
            1 => Ok(self.binary(to_probability(row[0]))),
            2 => Ok(self.binary(to_distribution(&row)[1])),
            _ => Ok(self.top_k(&to_distribution(&row))),
        }
    }

    fn binary(&self, positive: f32) -> ClassificationResult {
        let default_labels = ["negative".to_string(), "positive".to_string()];
        let labels = if self.labels.len() >= 2 {
            &self.labels[..2]
        } else {
            &default_labels[..]
        };

        let is_positive = positive >= BINARY_THRESHOLD;
        let negative = ClassPrediction {
            class_id: 0,
            class_name: labels[0].clone(),
            confidence: 1.0 - positive,
        };
        let positive = ClassPrediction {
            class_id: 1,
            class_name: labels[1].clone(),
            confidence: positive,
        };
        let predictions = if is_positive {
            vec![positive, negative]
        } else {
            vec![negative, positive]
        };

        ClassificationResult {
            top_class: predictions[0].class_name.clone(),
            top_class_id: predictions[0].class_id,
            top_confidence: predictions[0].confidence,
            predictions,
            is_positive: Some(is_positive),
        }
    }

    fn top_k(&self, probs: &[f32]) -> ClassificationResult {
        let mut ranked: Vec<usize> = (0..probs.len()).collect();
        // Stable sort keeps the lower class id first on ties.
        ranked.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let predictions: Vec<ClassPrediction> = ranked
            .into_iter()
            .take(self.top_k.min(probs.len()))
            .map(|class_id| ClassPrediction {
                class_id,
                class_name: class_name(self.labels, class_id),
                confidence: probs[class_id],
            })
            .collect();

        ClassificationResult {
            top_class: predictions[0].class_name.clone(),
            top_class_id: predictions[0].class_id,
            top_confidence: predictions[0].confidence,
            predictions,
            is_positive: None,
        }
    }
}

/// Rows that already sum to 1 are treated as probabilities, others as logits.
fn to_distribution(row: &[f32]) -> Vec<f32> {
    let sum: f32 = row.iter().sum();
    if (sum - 1.0).abs() <= STOCHASTIC_TOLERANCE {
        row.to_vec()
    } else {
        softmax(row)
    }
}

fn to_probability(value: f32) -> f32 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        sigmoid(value)
    }
}

pub(crate) fn softmax(row: &[f32]) -> Vec<f32> {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn, array};

    fn output(values: ArrayD<f32>) -> InferenceOutput {
        InferenceOutput::new().with("logits", values)
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_softmax_applied_to_logits() {
        let labels = labels(&["cat", "dog", "bird"]);
        let processor = ClassificationPostProcessor::new(&labels, 5);

        let result = processor
            .process(&output(array![[2.0f32, 5.0, 1.0]].into_dyn()))
            .unwrap();

        assert_eq!(result.top_class, "dog");
        assert_eq!(result.top_class_id, 1);
        assert!(
            (result.top_confidence - 0.9362).abs() < 1e-3,
            "softmax([2, 5, 1])[1] should be ~0.936 (got {})",
            result.top_confidence
        );
        assert_eq!(result.predictions.len(), 3, "top_k clamps to class count");
        assert_eq!(result.predictions[1].class_name, "cat");
        assert_eq!(result.is_positive, None);
    }

    #[test]
    fn test_probabilities_passed_through() {
        let processor = ClassificationPostProcessor::new(&[], 2);

        let result = processor
            .process(&output(array![[0.1f32, 0.2, 0.7]].into_dyn()))
            .unwrap();

        assert_eq!(result.top_class, "class_2", "missing labels fall back to class_<id>");
        assert!((result.top_confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.predictions.len(), 2);
    }

    #[test]
    fn test_ties_rank_lower_class_first() {
        let processor = ClassificationPostProcessor::new(&[], 3);
        let result = processor
            .process(&output(array![[0.25f32, 0.25, 0.25, 0.25]].into_dyn()))
            .unwrap();
        let ids: Vec<usize> = result.predictions.iter().map(|p| p.class_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_binary_single_probability() {
        let labels = labels(&["clean", "defect"]);
        let processor = ClassificationPostProcessor::new(&labels, 5);

        let result = processor.process(&output(array![[0.8f32]].into_dyn())).unwrap();

        assert_eq!(result.is_positive, Some(true));
        assert_eq!(result.top_class, "defect");
        assert!((result.top_confidence - 0.8).abs() < 1e-6);
        assert!((result.predictions[1].confidence - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_binary_single_logit_uses_sigmoid() {
        let processor = ClassificationPostProcessor::new(&[], 5);

        let result = processor.process(&output(array![[-3.0f32]].into_dyn())).unwrap();

        assert_eq!(result.is_positive, Some(false));
        assert_eq!(result.top_class, "negative");
        assert!(result.top_confidence > 0.95);
    }

    #[test]
    fn test_binary_two_columns() {
        let processor = ClassificationPostProcessor::new(&[], 5);

        let result = processor
            .process(&output(array![[0.3f32, 0.7]].into_dyn()))
            .unwrap();

        assert_eq!(result.is_positive, Some(true));
        assert_eq!(result.top_class, "positive");
        assert_eq!(result.top_class_id, 1);
    }

    #[test]
    fn test_binary_exact_threshold_is_positive() {
        let processor = ClassificationPostProcessor::new(&[], 5);
        let result = processor.process(&output(array![[0.5f32]].into_dyn())).unwrap();
        assert_eq!(result.is_positive, Some(true));
    }

    #[test]
    fn test_flat_output_without_batch_dim() {
        let processor = ClassificationPostProcessor::new(&[], 1);
        let result = processor
            .process(&output(array![0.0f32, 0.0, 9.0].into_dyn()))
            .unwrap();
        assert_eq!(result.top_class_id, 2);
    }

    #[test]
    fn test_empty_output_is_error() {
        let processor = ClassificationPostProcessor::new(&[], 5);
        let err = processor
            .process(&output(ArrayD::zeros(IxDyn(&[1, 0]))))
            .unwrap_err();
        assert!(matches!(err, InferenceError::Inference(_)));
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }
}
