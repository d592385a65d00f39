use anyhow::{Context, Result};
use std::path::Path;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;
use crate::geometry::BoundingBox;

/// Replays a fixed per-frame detection script.
///
/// Call `n` returns script entry `n`; past the end the backend returns no
/// detections, or wraps around when cycling is enabled. Used for tests and
/// for running the pipeline without a model.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
    cycle: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script,
            cursor: 0,
            cycle: false,
        }
    }

    /// Load a script from a JSON file: an array of frames, each an array of
    /// `{"bbox": {"x1":..,"y1":..,"x2":..,"y2":..}, "class_index": n, "confidence": c}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let script: Vec<Vec<RawDetection>> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid detection script {}", path.display()))?;
        Ok(Self::new(script))
    }

    /// Built-in script: people walking left to right in each class, plus an
    /// unmapped class index that is drawn but never counted.
    pub fn demo() -> Self {
        let mut script = Vec::new();
        for step in 0..40u32 {
            let x = 20.0 + step as f32 * 4.0;
            let mut frame = vec![
                RawDetection::new(BoundingBox::new(x, 60.0, x + 60.0, 140.0), 1, 0.91),
                RawDetection::new(BoundingBox::new(400.0, 200.0, 460.0, 280.0), 5, 0.40),
            ];
            if step % 10 < 6 {
                frame.push(RawDetection::new(
                    BoundingBox::new(300.0, 80.0 + step as f32, 360.0, 160.0 + step as f32),
                    0,
                    0.87,
                ));
            }
            if step % 20 == 0 {
                frame.push(RawDetection::new(
                    BoundingBox::new(500.0, 300.0, 560.0, 380.0),
                    2,
                    0.66,
                ));
            }
            if step == 25 {
                frame.push(RawDetection::new(
                    BoundingBox::new(100.0, 320.0, 160.0, 400.0),
                    3,
                    0.72,
                ));
            }
            script.push(frame);
        }
        Self::new(script).with_cycle(true)
    }

    pub fn with_cycle(mut self, cycle: bool) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let position = if self.cycle {
            self.cursor % self.script.len()
        } else {
            self.cursor
        };
        self.cursor += 1;
        let detections = self.script.get(position).cloned().unwrap_or_default();
        log::trace!(
            "scripted backend: frame #{} -> {} detection(s)",
            frame.index,
            detections.len()
        );
        Ok(detections)
    }
}
