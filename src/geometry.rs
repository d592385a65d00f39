//! Axis-aligned boxes and the overlap metric used for frame deduplication.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates (`x1 < x2`, `y1 < y2` for valid boxes).
///
/// Degenerate boxes are representable; every operation here tolerates them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from a center point and size, as detection heads emit them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Signed area, widened to `f64`. Inverted boxes yield a non-positive value.
    pub fn area(&self) -> f64 {
        (self.x2 as f64 - self.x1 as f64) * (self.y2 as f64 - self.y1 as f64)
    }

    /// Snap coordinates to whole pixels, truncating toward zero.
    pub fn truncated(self) -> Self {
        Self::new(
            self.x1.trunc(),
            self.y1.trunc(),
            self.x2.trunc(),
            self.y2.trunc(),
        )
    }

    /// Clamp the box into a `width` x `height` frame.
    pub fn clamped(self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }

}

/// Intersection-over-union of two boxes, in `[0, 1]` for valid input.
///
/// Returns exactly `0.0` when the intersection has no positive width or
/// height; no division happens in that case. Evaluated in `f64` so ratios a
/// hair above one half on large boxes do not collapse onto `0.5`.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let x1 = a.x1.max(b.x1) as f64;
    let y1 = a.y1.max(b.y1) as f64;
    let x2 = a.x2.min(b.x2) as f64;
    let y2 = a.y2.min(b.y2) as f64;
    let inter_w = x2 - x1;
    let inter_h = y2 - y1;
    if inter_w <= 0.0 || inter_h <= 0.0 {
        return 0.0;
    }
    let intersection = inter_w * inter_h;
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_is_symmetric() {
        let pairs = [
            (
                BoundingBox::new(10.0, 10.0, 50.0, 50.0),
                BoundingBox::new(12.0, 12.0, 52.0, 52.0),
            ),
            (
                BoundingBox::new(0.0, 0.0, 100.0, 20.0),
                BoundingBox::new(30.0, -5.0, 60.0, 80.0),
            ),
            (
                BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                BoundingBox::new(20.0, 20.0, 30.0, 30.0),
            ),
        ];
        for (a, b) in pairs {
            assert_eq!(iou(&a, &b), iou(&b, &a));
        }
    }

    #[test]
    fn iou_of_box_with_itself_is_one() {
        let a = BoundingBox::new(3.0, 4.0, 17.0, 29.0);
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn disjoint_boxes_have_zero_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn touching_edges_have_zero_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn degenerate_boxes_do_not_panic() {
        let point = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        let inverted = BoundingBox::new(10.0, 10.0, 0.0, 0.0);
        let normal = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&point, &normal), 0.0);
        assert_eq!(iou(&inverted, &normal), 0.0);
        assert_eq!(iou(&point, &point), 0.0);
    }

    #[test]
    fn shifted_box_overlap_matches_hand_computation() {
        let a = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        let b = BoundingBox::new(12.0, 12.0, 52.0, 52.0);
        // 38*38 / (1600 + 1600 - 1444)
        let expected = 1444.0 / 1756.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn large_boxes_keep_overlap_just_above_half() {
        // Union 2^24 - 1 is not representable once 2^23 is added in f32.
        let inner = BoundingBox::new(0.0, 0.0, 8_388_608.0, 1.0);
        let outer = BoundingBox::new(0.0, 0.0, 16_777_215.0, 1.0);
        let value = iou(&inner, &outer);
        assert!(value > 0.5, "iou collapsed to {}", value);
        assert_eq!(value, 8_388_608.0 / 16_777_215.0);
    }

    #[test]
    fn from_center_round_trips_extent() {
        let b = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(b, BoundingBox::new(40.0, 35.0, 60.0, 45.0));
        assert_eq!(b.area(), 200.0);
    }
}
