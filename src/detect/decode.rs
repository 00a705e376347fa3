//! Raw output tensor decoding and duplicate suppression.
//!
//! The network emits a channel-major tensor of `(4 + classes) × boxes`
//! values: center-x, center-y, width and height rows, then one score row per
//! class. Decoding walks every box slot, keeps the arg-max class when its
//! score clears the confidence threshold, and converts the geometry to
//! top-left form in model input pixels.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::detect::result::{BoundingBox, Detection};

/// Unit of the box geometry rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxUnits {
    /// Model input pixels (0..input_size).
    #[default]
    Pixels,
    /// Fractions of the input (0..1); scaled by the input size on decode.
    Normalized,
}

/// Shape of the raw output tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    pub num_classes: usize,
    pub num_boxes: usize,
}

impl OutputLayout {
    /// Derive the layout from a model's declared output shape.
    ///
    /// Accepts `[channels, boxes]` with any number of leading unit batch
    /// dimensions. The channel count must equal `4 + num_classes`.
    pub fn from_shape(shape: &[usize], num_classes: usize) -> Result<Self> {
        let mut dims = shape;
        while dims.len() > 2 && dims[0] == 1 {
            dims = &dims[1..];
        }
        let [channels, num_boxes] = dims else {
            return Err(anyhow!(
                "unsupported output shape {:?}; expected [1, 4 + classes, boxes]",
                shape
            ));
        };
        if *channels != 4 + num_classes {
            return Err(anyhow!(
                "model output declares {} channels but {} labels need {}",
                channels,
                num_classes,
                4 + num_classes
            ));
        }
        if *num_boxes == 0 {
            return Err(anyhow!("model output declares zero boxes"));
        }
        Ok(Self {
            num_classes,
            num_boxes: *num_boxes,
        })
    }

    pub fn channels(&self) -> usize {
        4 + self.num_classes
    }

    pub fn expected_len(&self) -> usize {
        self.channels() * self.num_boxes
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeOptions {
    pub confidence_threshold: f32,
    pub input_size: u32,
    pub units: BoxUnits,
}

/// Decode every box slot into candidate detections.
///
/// Returns an empty list when `output` does not match `layout`. The result is
/// unordered with respect to confidence and has not been suppressed.
pub fn decode_output(
    output: &[f32],
    layout: &OutputLayout,
    labels: &[String],
    options: &DecodeOptions,
) -> Vec<Detection> {
    if output.len() != layout.expected_len() || labels.len() != layout.num_classes {
        return Vec::new();
    }

    let n = layout.num_boxes;
    let scale = match options.units {
        BoxUnits::Pixels => 1.0,
        BoxUnits::Normalized => options.input_size as f32,
    };

    let mut detections = Vec::new();
    for i in 0..n {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_class = 0;
        for class in 0..layout.num_classes {
            let score = output[(4 + class) * n + i];
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !(best_score > options.confidence_threshold) {
            continue;
        }

        let cx = output[i] * scale;
        let cy = output[n + i] * scale;
        let width = output[2 * n + i] * scale;
        let height = output[3 * n + i] * scale;
        if !(width >= 0.0 && height >= 0.0 && cx.is_finite() && cy.is_finite()) {
            continue;
        }

        detections.push(Detection {
            bbox: BoundingBox::from_center(cx, cy, width, height),
            confidence: best_score,
            class_label: labels[best_class].clone(),
            class_index: best_class,
        });
    }
    detections
}

/// Decoder bound to one loaded model and label set.
pub struct Decoder {
    layout: OutputLayout,
    labels: Vec<String>,
    options: DecodeOptions,
    mismatch_reported: bool,
}

impl Decoder {
    pub fn new(layout: OutputLayout, labels: Vec<String>, options: DecodeOptions) -> Result<Self> {
        if labels.len() != layout.num_classes {
            return Err(anyhow!(
                "{} labels loaded but the model scores {} classes",
                labels.len(),
                layout.num_classes
            ));
        }
        Ok(Self {
            layout,
            labels,
            options,
            mismatch_reported: false,
        })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Decode one raw output. A length mismatch yields no detections and is
    /// logged the first time only.
    pub fn decode(&mut self, output: &[f32]) -> Vec<Detection> {
        if output.len() != self.layout.expected_len() {
            if !self.mismatch_reported {
                log::error!(
                    "output tensor has {} values, expected {} ({} channels x {} boxes); decoding disabled for mismatched frames",
                    output.len(),
                    self.layout.expected_len(),
                    self.layout.channels(),
                    self.layout.num_boxes
                );
                self.mismatch_reported = true;
            }
            return Vec::new();
        }
        decode_output(output, &self.layout, &self.labels, &self.options)
    }
}

/// Intersection over union of two axis-aligned boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let left = a.x.max(b.x);
    let top = a.y.max(b.y);
    let right = a.right().min(b.right());
    let bottom = a.bottom().min(b.bottom());

    if right < left || bottom < top {
        return 0.0;
    }

    let intersection = (right - left) * (bottom - top);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Greedy non-max suppression, class-agnostic.
///
/// Candidates are visited by descending confidence (ties keep scan order); a
/// candidate is kept unless its IoU with an already kept box exceeds
/// `iou_threshold`.
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept
            .iter()
            .any(|k| iou(&k.bbox, &candidate.bbox) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

/// Drop boxes whose area does not exceed `min_area` (model pixels squared).
pub fn filter_min_area(detections: Vec<Detection>, min_area: f32) -> Vec<Detection> {
    if min_area <= 0.0 {
        return detections;
    }
    detections
        .into_iter()
        .filter(|det| det.bbox.area() > min_area)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("class{}", i)).collect()
    }

    fn det(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, y, w, h),
            confidence,
            class_label: "Matang".to_string(),
            class_index: 0,
        }
    }

    /// Channel-major tensor from per-box rows of `[cx, cy, w, h, scores...]`.
    fn tensor(rows: &[Vec<f32>]) -> Vec<f32> {
        let channels = rows[0].len();
        let n = rows.len();
        let mut out = vec![0.0; channels * n];
        for (i, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                out[c * n + i] = *value;
            }
        }
        out
    }

    fn options(threshold: f32) -> DecodeOptions {
        DecodeOptions {
            confidence_threshold: threshold,
            input_size: 640,
            units: BoxUnits::Pixels,
        }
    }

    #[test]
    fn layout_is_derived_from_declared_shape() {
        let layout = OutputLayout::from_shape(&[1, 9, 8400], 5).unwrap();
        assert_eq!(layout.num_boxes, 8400);
        assert_eq!(layout.expected_len(), 9 * 8400);

        let layout = OutputLayout::from_shape(&[6, 2100], 2).unwrap();
        assert_eq!(layout.num_boxes, 2100);

        assert!(OutputLayout::from_shape(&[1, 9, 8400], 4).is_err());
        assert!(OutputLayout::from_shape(&[1, 2, 9, 8400], 5).is_err());
        assert!(OutputLayout::from_shape(&[9], 5).is_err());
    }

    #[test]
    fn decode_picks_arg_max_class_and_converts_to_top_left() {
        let output = tensor(&[
            vec![320.0, 320.0, 64.0, 64.0, 0.1, 0.8, 0.3],
            vec![100.0, 100.0, 20.0, 20.0, 0.2, 0.1, 0.3],
        ]);
        let layout = OutputLayout::from_shape(&[1, 7, 2], 3).unwrap();
        let dets = decode_output(&output, &layout, &labels(3), &options(0.5));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_index, 1);
        assert_eq!(dets[0].class_label, "class1");
        assert_eq!(dets[0].confidence, 0.8);
        assert_eq!(dets[0].bbox, BoundingBox::new(288.0, 288.0, 64.0, 64.0));
    }

    #[test]
    fn every_decoded_detection_clears_the_threshold() {
        let rows: Vec<Vec<f32>> = (0..50)
            .map(|i| {
                let score = i as f32 / 50.0;
                vec![10.0 * i as f32, 5.0, 8.0, 8.0, score, score / 2.0]
            })
            .collect();
        let output = tensor(&rows);
        let layout = OutputLayout::from_shape(&[1, 6, 50], 2).unwrap();
        for t in [0.0, 0.25, 0.5, 0.6, 0.98] {
            let dets = decode_output(&output, &layout, &labels(2), &options(t));
            assert!(dets.iter().all(|d| d.confidence > t), "threshold {}", t);
        }
        let at_half = decode_output(&output, &layout, &labels(2), &options(0.5));
        assert_eq!(at_half.len(), 24);
    }

    #[test]
    fn normalized_units_scale_by_input_size() {
        let output = tensor(&[vec![0.5, 0.5, 0.1, 0.1, 0.9]]);
        let layout = OutputLayout::from_shape(&[1, 5, 1], 1).unwrap();
        let opts = DecodeOptions {
            units: BoxUnits::Normalized,
            ..options(0.5)
        };
        let dets = decode_output(&output, &layout, &labels(1), &opts);
        assert_eq!(dets[0].bbox, BoundingBox::new(288.0, 288.0, 64.0, 64.0));
    }

    #[test]
    fn wrong_tensor_length_yields_no_detections() {
        let layout = OutputLayout::from_shape(&[1, 9, 8400], 5).unwrap();
        let mut decoder = Decoder::new(layout, labels(5), options(0.5)).unwrap();
        let short = vec![0.9; 8 * 8400];
        assert!(decoder.decode(&short).is_empty());
        assert!(decoder.decode(&short).is_empty());
        assert!(decoder.mismatch_reported);
    }

    #[test]
    fn decoder_rejects_label_count_mismatch() {
        let layout = OutputLayout::from_shape(&[1, 9, 10], 5).unwrap();
        assert!(Decoder::new(layout, labels(4), options(0.5)).is_err());
    }

    #[test]
    fn iou_is_symmetric_and_one_for_identical_boxes() {
        let boxes = [
            BoundingBox::new(0.0, 0.0, 100.0, 100.0),
            BoundingBox::new(25.0, 10.0, 100.0, 50.0),
            BoundingBox::new(300.0, 300.0, 10.0, 10.0),
            BoundingBox::new(90.0, 90.0, 40.0, 40.0),
        ];
        for a in &boxes {
            assert!((iou(a, a) - 1.0).abs() < 1e-6);
            for b in &boxes {
                assert_eq!(iou(a, b), iou(b, a));
            }
        }
        assert_eq!(iou(&boxes[0], &boxes[2]), 0.0);
    }

    #[test]
    fn nms_keeps_only_the_stronger_of_two_overlapping_boxes() {
        let strong = det(0.0, 0.0, 100.0, 100.0, 0.9);
        let weak = det(25.0, 0.0, 100.0, 100.0, 0.7);
        assert!((iou(&strong.bbox, &weak.bbox) - 0.6).abs() < 1e-6);

        let kept = apply_nms(vec![weak, strong], 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_leaves_kept_pairs_below_threshold() {
        let mut dets = Vec::new();
        for i in 0..30 {
            let offset = (i * 7 % 60) as f32;
            dets.push(det(offset, offset / 2.0, 50.0, 40.0, 0.5 + i as f32 / 100.0));
        }
        for threshold in [0.3, 0.45, 0.5, 0.7] {
            let kept = apply_nms(dets.clone(), threshold);
            for (i, a) in kept.iter().enumerate() {
                for b in kept.iter().skip(i + 1) {
                    assert!(iou(&a.bbox, &b.bbox) <= threshold);
                }
            }
        }
    }

    #[test]
    fn nms_breaks_confidence_ties_by_scan_order() {
        let mut first = det(0.0, 0.0, 10.0, 10.0, 0.8);
        first.class_label = "first".to_string();
        let mut second = det(1.0, 0.0, 10.0, 10.0, 0.8);
        second.class_label = "second".to_string();
        let kept = apply_nms(vec![first, second], 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_label, "first");
    }

    #[test]
    fn min_area_filter_drops_small_boxes() {
        let dets = vec![det(0.0, 0.0, 50.0, 50.0, 0.9), det(0.0, 0.0, 100.0, 100.0, 0.8)];
        let kept = filter_min_area(dets.clone(), 6000.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.8);
        assert_eq!(filter_min_area(dets, 0.0).len(), 2);
    }
}
