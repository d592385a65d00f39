//! Frame-pairwise deduplication.
//!
//! A detection is NEW unless it overlaps some detection of the immediately
//! preceding frame with IoU strictly greater than [`SEEN_IOU_THRESHOLD`].
//! Labels play no part in the match, and nothing older than one frame is
//! remembered.

use crate::geometry::{iou, BoundingBox};
use crate::label::MaskLabel;

/// IoU above which a detection is treated as already seen. Equality is NEW.
pub const SEEN_IOU_THRESHOLD: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Novelty {
    New,
    Seen,
}

/// Box and resolved label retained from one frame for comparison against the next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedBox {
    pub bbox: BoundingBox,
    pub label: Option<MaskLabel>,
}

/// Classify one box against the previous frame's set.
pub fn classify(bbox: &BoundingBox, previous: &[TrackedBox]) -> Novelty {
    if previous
        .iter()
        .any(|prev| iou(bbox, &prev.bbox) > SEEN_IOU_THRESHOLD)
    {
        Novelty::Seen
    } else {
        Novelty::New
    }
}

/// Classify every box in `current` against `previous`, preserving order.
pub fn classify_frame(current: &[TrackedBox], previous: &[TrackedBox]) -> Vec<Novelty> {
    current
        .iter()
        .map(|tracked| classify(&tracked.bbox, previous))
        .collect()
}

/// Holds the previous frame's boxes between iterations.
#[derive(Debug, Default)]
pub struct FrameDeduplicator {
    last_boxes: Vec<TrackedBox>,
}

impl FrameDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `current` against the stored frame, then store `current`.
    ///
    /// Every box seeds the next comparison, whether NEW or SEEN and whether
    /// or not it carries a label.
    pub fn observe(&mut self, current: Vec<TrackedBox>) -> Vec<(TrackedBox, Novelty)> {
        let novelty = classify_frame(&current, &self.last_boxes);
        let out = current.iter().copied().zip(novelty).collect();
        self.last_boxes = current;
        out
    }

    pub fn last_boxes(&self) -> &[TrackedBox] {
        &self.last_boxes
    }
}
