use serde::{Deserialize, Serialize};

use crate::dedup::TrackedBox;
use crate::geometry::BoundingBox;
use crate::label::MaskLabel;

/// One object instance as returned by a model, before label resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Box in frame pixel coordinates.
    pub bbox: BoundingBox,
    /// Model class index; only 0..=3 map to a label.
    pub class_index: i64,
    /// Carried for logging only.
    #[serde(default)]
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(bbox: BoundingBox, class_index: i64, confidence: f32) -> Self {
        Self {
            bbox,
            class_index,
            confidence,
        }
    }
}

/// A detection with its class index resolved against the label map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: Option<MaskLabel>,
    pub confidence: f32,
}

impl Detection {
    /// Boxes are truncated to whole pixels before they are compared across frames.
    pub fn resolve(raw: RawDetection) -> Self {
        Self {
            bbox: raw.bbox.truncated(),
            label: MaskLabel::from_class_index(raw.class_index),
            confidence: raw.confidence,
        }
    }

    pub fn tracked(&self) -> TrackedBox {
        TrackedBox {
            bbox: self.bbox,
            label: self.label,
        }
    }
}
