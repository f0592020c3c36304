use super::class_name;
use crate::error::{InferenceError, Result};
use crate::tensor::InferenceOutput;
use ndarray::{Array2, ArrayD, ArrayView3, Axis, Ix2, Ix3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One run of identical class ids in a row-major flattened map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub value: u32,
    pub start: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationResult {
    pub segmentation_map_encoded: Vec<Run>,
    /// `[height, width]`
    pub shape: [usize; 2],
    /// Percentage of pixels per class name.
    pub class_distribution: BTreeMap<String, f32>,
    pub dominant_class: Option<String>,
    pub unique_classes: Vec<u32>,
    pub class_names: Vec<String>,
    #[serde(skip)]
    pub(crate) pixel_counts: BTreeMap<u32, usize>,
}

impl SegmentationResult {
    pub fn pixel_count(&self) -> usize {
        self.shape[0] * self.shape[1]
    }

    /// Decode back into a `[height, width]` class map.
    pub fn decode_map(&self) -> Result<Array2<u32>> {
        let flat = rle_decode(&self.segmentation_map_encoded);
        Ok(Array2::from_shape_vec((self.shape[0], self.shape[1]), flat)?)
    }
}

pub struct SegmentationPostProcessor<'a> {
    labels: &'a [String],
    channels_last: bool,
}

impl<'a> SegmentationPostProcessor<'a> {
    pub fn new(labels: &'a [String], channels_last: bool) -> Self {
        Self {
            labels,
            channels_last,
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn process(&self, output: &InferenceOutput) -> Result<SegmentationResult> {
        let class_map = self.class_map(output.first()?)?;
        let (height, width) = class_map.dim();
        let flat: Vec<u32> = class_map.iter().copied().collect();

        let mut pixel_counts: BTreeMap<u32, usize> = BTreeMap::new();
        for &class_id in &flat {
            *pixel_counts.entry(class_id).or_default() += 1;
        }

        let total = flat.len().max(1) as f32;
        let mut class_distribution: BTreeMap<String, f32> = BTreeMap::new();
        for (&id, &n) in &pixel_counts {
            // Ids sharing a label pool their share.
            *class_distribution
                .entry(class_name(self.labels, id as usize))
                .or_default() += n as f32 / total * 100.0;
        }

        // Ascending id order, so the first maximum is the lowest id.
        let dominant = pixel_counts
            .iter()
            .fold(None, |best: Option<(u32, usize)>, (&id, &n)| match best {
                Some((_, b)) if b >= n => best,
                _ => Some((id, n)),
            })
            .map(|(id, _)| class_name(self.labels, id as usize));

        let unique_classes: Vec<u32> = pixel_counts.keys().copied().collect();
        let class_names = unique_classes
            .iter()
            .map(|&id| class_name(self.labels, id as usize))
            .collect();

        Ok(SegmentationResult {
            segmentation_map_encoded: rle_encode(&flat),
            shape: [height, width],
            class_distribution,
            dominant_class: dominant,
            unique_classes,
            class_names,
            pixel_counts,
        })
    }

    /// Reduce a raw output to a `[height, width]` map of class ids.
    ///
    /// Score volumes are arg-maxed over the class axis; outputs that already
    /// hold class ids are used as-is.
    fn class_map(&self, tensor: &ArrayD<f32>) -> Result<Array2<u32>> {
        let shape = tensor.shape().to_vec();
        let unbatched = match shape.len() {
            4 | 3 if shape[0] == 1 => tensor.index_axis(Axis(0), 0),
            2 => tensor.view(),
            _ => {
                return Err(InferenceError::Inference(format!(
                    "segmentation output has shape {:?}, expected [1, H, W, C], [1, C, H, W], [1, H, W] or [H, W]",
                    shape
                )));
            }
        };

        if unbatched.ndim() == 2 {
            let ids = unbatched.into_dimensionality::<Ix2>()?;
            return Ok(ids.mapv(to_class_id));
        }

        let volume = unbatched.into_dimensionality::<Ix3>()?;
        let volume = if self.channels_last {
            volume
        } else {
            volume.permuted_axes([1, 2, 0])
        };
        Ok(argmax_last(volume))
    }
}

fn argmax_last(volume: ArrayView3<'_, f32>) -> Array2<u32> {
    let (height, width, channels) = volume.dim();
    if channels == 1 {
        return volume.index_axis(Axis(2), 0).mapv(to_class_id);
    }
    Array2::from_shape_fn((height, width), |(y, x)| {
        let mut best = 0usize;
        for c in 1..channels {
            if volume[[y, x, c]] > volume[[y, x, best]] {
                best = c;
            }
        }
        best as u32
    })
}

fn to_class_id(value: f32) -> u32 {
    value.max(0.0).round() as u32
}

/// Run-length encode a flattened class map.
pub fn rle_encode(flat: &[u32]) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for (i, &value) in flat.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if run.value == value => run.length += 1,
            _ => runs.push(Run {
                value,
                start: i,
                length: 1,
            }),
        }
    }
    runs
}

pub fn rle_decode(runs: &[Run]) -> Vec<u32> {
    let total = runs.iter().map(|r| r.length).sum();
    let mut flat = Vec::with_capacity(total);
    for run in runs {
        flat.extend(std::iter::repeat_n(run.value, run.length));
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn, array};

    fn output(tensor: ArrayD<f32>) -> InferenceOutput {
        InferenceOutput::new().with("logits", tensor)
    }

    #[test]
    fn test_rle_round_trip_uniform_map() {
        let flat = vec![4u32; 64];
        let runs = rle_encode(&flat);
        assert_eq!(
            runs,
            vec![Run {
                value: 4,
                start: 0,
                length: 64
            }]
        );
        assert_eq!(rle_decode(&runs), flat);
    }

    #[test]
    fn test_rle_round_trip_checkerboard() {
        let map = Array2::from_shape_fn((4, 4), |(y, x)| ((y + x) % 2) as u32);
        let flat: Vec<u32> = map.iter().copied().collect();
        let runs = rle_encode(&flat);
        // Each row ends on the value the next one starts with, so those pairs merge.
        assert_eq!(runs.len(), 13);
        assert_eq!(rle_decode(&runs), flat);
    }

    #[test]
    fn test_duplicate_labels_sum_distribution() {
        // [1, 2, 2] class-id map: ids 0 and 1 share a label
        let tensor = array![[[0.0f32, 1.0], [1.0, 2.0]]].into_dyn();
        let labels = vec![
            "background".to_string(),
            "background".to_string(),
            "person".to_string(),
        ];
        let processor = SegmentationPostProcessor::new(&labels, true);

        let result = processor.process(&output(tensor)).unwrap();

        assert_eq!(result.class_distribution.len(), 2);
        assert_eq!(result.class_distribution["background"], 75.0);
        assert_eq!(result.class_distribution["person"], 25.0);
    }

    #[test]
    fn test_rle_empty() {
        assert!(rle_encode(&[]).is_empty());
        assert!(rle_decode(&[]).is_empty());
    }

    #[test]
    fn test_rle_runs_cross_row_boundaries() {
        let runs = rle_encode(&[1, 1, 1, 1, 2, 2]);
        assert_eq!(runs[0].length, 4);
        assert_eq!(runs[1].start, 4);
    }

    #[test]
    fn test_channels_last_argmax() {
        // [1, 1, 2, 3]: pixel 0 prefers class 2, pixel 1 prefers class 0
        let tensor = array![[[[0.1f32, 0.2, 0.7], [0.9, 0.05, 0.05]]]].into_dyn();
        let labels = vec!["sky".to_string(), "road".to_string(), "tree".to_string()];
        let processor = SegmentationPostProcessor::new(&labels, true);

        let result = processor.process(&output(tensor)).unwrap();

        assert_eq!(result.shape, [1, 2]);
        assert_eq!(result.unique_classes, vec![0, 2]);
        assert_eq!(result.class_names, vec!["sky", "tree"]);
        assert_eq!(result.class_distribution["sky"], 50.0);
        assert_eq!(result.dominant_class.as_deref(), Some("sky"), "ties go to the lowest id");
        assert_eq!(result.decode_map().unwrap(), array![[2u32, 0]]);
    }

    #[test]
    fn test_channels_first_argmax() {
        // [1, 2, 1, 2]: class axis first
        let tensor = Array::from_shape_vec(IxDyn(&[1, 2, 1, 2]), vec![0.9f32, 0.1, 0.1, 0.9]).unwrap();
        let processor = SegmentationPostProcessor::new(&[], false);

        let result = processor.process(&output(tensor)).unwrap();

        assert_eq!(result.decode_map().unwrap(), array![[0u32, 1]]);
        assert_eq!(result.class_names, vec!["class_0", "class_1"]);
    }

    #[test]
    fn test_class_id_map_skips_argmax() {
        let tensor = array![[[3.0f32, 3.0, 1.0], [3.0, 1.0, 1.0]]].into_dyn();
        let processor = SegmentationPostProcessor::new(&[], true);

        let result = processor.process(&output(tensor)).unwrap();

        assert_eq!(result.shape, [2, 3]);
        assert_eq!(result.unique_classes, vec![1, 3]);
        assert_eq!(result.dominant_class.as_deref(), Some("class_1"));
        assert_eq!(result.pixel_count(), 6);
        assert_eq!(result.segmentation_map_encoded.len(), 4);
    }

    #[test]
    fn test_single_channel_volume_is_class_ids() {
        let tensor = array![[[[2.0f32], [2.0]]]].into_dyn();
        let processor = SegmentationPostProcessor::new(&[], true);
        let result = processor.process(&output(tensor)).unwrap();
        assert_eq!(result.unique_classes, vec![2]);
        assert_eq!(result.class_distribution["class_2"], 100.0);
    }

    #[test]
    fn test_unexpected_rank_rejected() {
        let tensor = ArrayD::<f32>::zeros(IxDyn(&[2, 2, 2, 2, 2]));
        let processor = SegmentationPostProcessor::new(&[], true);
        assert!(processor.process(&output(tensor)).is_err());
    }
}
