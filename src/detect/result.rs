use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Axis-aligned box in top-left form.
///
/// The coordinate space is whatever stage produced it: model input pixels,
/// source pixels, screen points or container points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert a center-form box (cx, cy, w, h) to top-left form.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// True when the box covers no area at all.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// A single decoded detection.
///
/// `confidence` is the arg-max class score captured at decode time and is
/// never recomputed by later stages; mapping only moves `bbox`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_label: String,
    pub class_index: usize,
}

impl Detection {
    /// Same detection, relocated into another coordinate space.
    pub fn with_bbox(&self, bbox: BoundingBox) -> Self {
        Self {
            bbox,
            confidence: self.confidence,
            class_label: self.class_label.clone(),
            class_index: self.class_index,
        }
    }
}

/// Per-cycle performance figures. Recomputed every cycle, never stored.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InferenceStats {
    /// Reciprocal of the wall-clock delta between consecutive publishes.
    pub fps: f32,
    /// Cycle start to decode completion.
    pub latency: Duration,
}

impl InferenceStats {
    pub fn latency_millis(&self) -> u64 {
        self.latency.as_millis() as u64
    }
}

/// Highest-confidence detection; the earliest one wins a tie.
pub fn best_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best, det| match best {
        Some(current) if det.confidence <= current.confidence => Some(current),
        _ => Some(det),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(confidence: f32, label: &str) -> Detection {
        Detection {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            confidence,
            class_label: label.to_string(),
            class_index: 0,
        }
    }

    #[test]
    fn center_form_converts_to_top_left() {
        let b = BoundingBox::from_center(320.0, 320.0, 64.0, 64.0);
        assert_eq!(b, BoundingBox::new(288.0, 288.0, 64.0, 64.0));
        assert_eq!(b.right(), 352.0);
        assert_eq!(b.bottom(), 352.0);
        assert_eq!(b.area(), 4096.0);
    }

    #[test]
    fn best_detection_prefers_first_on_tie() {
        let dets = vec![det(0.7, "a"), det(0.9, "b"), det(0.9, "c")];
        let best = best_detection(&dets).unwrap();
        assert_eq!(best.class_label, "b");
        assert!(best_detection(&[]).is_none());
    }
}
