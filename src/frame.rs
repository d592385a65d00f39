//! Decoded frames, overlay annotations, and the display boundary.
//!
//! - `Frame`: RGB24 pixels plus capture metadata.
//! - `Annotation`: a box, caption and color drawn for every detection,
//!   labeled or not.
//! - `FrameSink`: where annotated frames go. A sink reports whether the
//!   operator asked to quit.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::geometry::BoundingBox;
use crate::label::{MaskLabel, Rgb, DEFAULT_MARKER, UNLABELED_CAPTION};

/// Outline thickness in pixels.
const MARKER_THICKNESS: u32 = 2;

/// One decoded RGB24 frame.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based position in the source stream.
    pub index: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            captured_at: Instant::now(),
        })
    }

    /// Blank frame, used by synthetic sources and tests.
    pub fn blank(width: u32, height: u32, index: u64) -> Self {
        Self {
            pixels: vec![0u8; width as usize * height as usize * 3],
            width,
            height,
            index,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: Rgb) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&color);
    }

    /// Draw a rectangle outline, clipped to the frame.
    pub fn draw_outline(&mut self, bbox: &BoundingBox, color: Rgb) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let b = bbox.clamped(self.width - 1, self.height - 1);
        let (x1, y1, x2, y2) = (b.x1 as u32, b.y1 as u32, b.x2 as u32, b.y2 as u32);
        if x2 < x1 || y2 < y1 {
            return;
        }
        for t in 0..MARKER_THICKNESS {
            for x in x1..=x2 {
                self.put_pixel(x, y1.saturating_add(t).min(y2), color);
                self.put_pixel(x, y2.saturating_sub(t).max(y1), color);
            }
            for y in y1..=y2 {
                self.put_pixel(x1.saturating_add(t).min(x2), y, color);
                self.put_pixel(x2.saturating_sub(t).max(x1), y, color);
            }
        }
    }
}

/// Overlay for one detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: Option<MaskLabel>,
    pub caption: String,
    pub color: Rgb,
}

impl Annotation {
    /// Unlabeled detections get the default marker and caption.
    pub fn for_detection(bbox: BoundingBox, label: Option<MaskLabel>) -> Self {
        match label {
            Some(label) => Self {
                bbox,
                label: Some(label),
                caption: label.as_str().to_string(),
                color: label.color(),
            },
            None => Self {
                bbox,
                label: None,
                caption: UNLABELED_CAPTION.to_string(),
                color: DEFAULT_MARKER,
            },
        }
    }
}

/// Draw every annotation's outline onto the frame.
pub fn annotate(frame: &mut Frame, annotations: &[Annotation]) {
    for annotation in annotations {
        frame.draw_outline(&annotation.bbox, annotation.color);
    }
}

/// Display boundary for annotated frames.
pub trait FrameSink {
    /// Present one frame. Returns `true` when the operator asked to quit.
    fn show(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<bool>;
}

/// Sink with no window. Quit comes from a shared flag (e.g. set by Ctrl-C).
#[derive(Clone, Debug, Default)]
pub struct HeadlessSink {
    quit: Arc<AtomicBool>,
}

impl HeadlessSink {
    pub fn new(quit: Arc<AtomicBool>) -> Self {
        Self { quit }
    }

    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }
}

impl FrameSink for HeadlessSink {
    fn show(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<bool> {
        if !annotations.is_empty() {
            log::trace!(
                "frame #{}: {} annotation(s), {}ms since capture",
                frame.index,
                annotations.len(),
                frame.age_ms()
            );
        }
        Ok(self.quit.load(Ordering::SeqCst))
    }
}
