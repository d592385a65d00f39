use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Model inference boundary.
///
/// Implementations take one decoded frame and return every object instance
/// they found, in pixel coordinates of that frame. An `Err` is fatal to the
/// detection run; there is no per-frame retry.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on a frame.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
