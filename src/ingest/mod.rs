//! Frame sources.
//!
//! - Local video files and capture devices via FFmpeg (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` source (testing, demos)
//!
//! A source yields decoded RGB24 frames until it is exhausted. End-of-stream
//! is `Ok(None)`; the detection loop also treats a read error as end-of-stream.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

use anyhow::Result;

use crate::frame::Frame;

pub use file::{FileConfig, FileSource};

/// Video source boundary.
pub trait FrameSource {
    /// Prepare the source. Called once before the first frame.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read the next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub location: String,
}
