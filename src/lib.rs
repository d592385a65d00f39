//! Mask Tally
//!
//! Real-time mask detection counter. A detection model runs over a video
//! feed; detections are deduplicated frame-to-frame by box overlap, counted
//! per class, and published to a shared store that dashboards poll.
//!
//! # Pipeline
//!
//! frame → inference → label resolution → dedup against the previous frame
//! → count + history append → publish → (dashboard) periodic snapshot read.
//!
//! # Module Structure
//!
//! - `geometry`: boxes and IoU
//! - `dedup`: NEW/SEEN classification against the previous frame
//! - `tally`: per-class counters
//! - `detect`: inference backends and their registry
//! - `ingest`: frame sources
//! - `frame`: frames, overlay annotations, display sinks
//! - `driver`: the detection loop
//! - `storage`: in-memory and SQLite state publishers
//! - `dashboard`: background snapshot poller
//! - `api`: HTTP snapshot endpoints
//! - `config`: file + environment configuration

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub mod api;
pub mod config;
pub mod dashboard;
pub mod dedup;
pub mod detect;
pub mod driver;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod label;
pub mod storage;
pub mod tally;

pub use dashboard::{DashboardHandle, DashboardPoller};
pub use dedup::{classify, classify_frame, FrameDeduplicator, Novelty, TrackedBox};
pub use detect::{BackendRegistry, Detection, InferenceBackend, RawDetection, ScriptedBackend};
pub use driver::{DetectionLoop, RunOutcome, StopReason};
pub use frame::{Annotation, Frame, FrameSink, HeadlessSink};
pub use geometry::{iou, BoundingBox};
pub use ingest::{FileConfig, FileSource, FrameSource, SourceStats};
pub use label::MaskLabel;
pub use storage::{
    InMemoryStatePublisher, SqliteStatePublisher, StatePublisher, StateView,
    DEFAULT_HISTORY_WINDOW,
};
pub use tally::{CountTable, Tally};

/// URI for a named in-memory SQLite database that several connections can share.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:mask_tally_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Open an existing database without write access. A missing file is an error.
pub(crate) fn open_db_connection_read_only(db_path: &str) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    )?)
}

// -------------------- Timestamps --------------------

/// Wire and storage format for timestamps (local wall-clock time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local wall-clock instant. Rendered at second precision; the sub-second
/// part is kept only for duration arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(Local::now().naive_local())
    }

    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self(value)
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Same instant with the sub-second part dropped.
    pub fn truncated(&self) -> Self {
        Self(self.0.with_nanosecond(0).unwrap_or(self.0))
    }

    pub fn seconds_since(&self, earlier: &Timestamp) -> f64 {
        let delta = self.0 - earlier.0;
        delta.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .map(Self)
            .map_err(|e| anyhow!("invalid timestamp '{}': {}", s, e))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Render a duration the way operators read it: `H:MM:SS` plus microseconds when present.
pub fn format_duration_secs(secs: f64) -> String {
    let micros_total = (secs.max(0.0) * 1_000_000.0).round() as u64;
    let whole = micros_total / 1_000_000;
    let micros = micros_total % 1_000_000;
    let (h, m, s) = (whole / 3600, (whole % 3600) / 60, whole % 60);
    if micros == 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}:{:02}.{:06}", h, m, s, micros)
    }
}

// -------------------- Events --------------------

/// One newly counted detection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: Timestamp,
    pub label: MaskLabel,
}

impl HistoryEntry {
    pub fn now(label: MaskLabel) -> Self {
        Self {
            timestamp: Timestamp::now(),
            label,
        }
    }
}

/// Terminal record of one detection run. `total` always equals the sum of `counts`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Publication key; equal to `end_time`.
    pub timestamp: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// `H:MM:SS[.ffffff]` rendering of `duration_secs`.
    pub duration: String,
    pub duration_secs: f64,
    #[serde(flatten)]
    pub counts: CountTable,
    #[serde(rename = "Total")]
    pub total: u64,
}

impl SummaryRecord {
    pub fn new(start_time: Timestamp, end_time: Timestamp, counts: CountTable) -> Self {
        let duration_secs = end_time.seconds_since(&start_time);
        Self {
            timestamp: end_time,
            start_time,
            end_time,
            duration: format_duration_secs(duration_secs),
            duration_secs,
            counts,
            total: counts.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_renders_at_second_precision() {
        let ts: Timestamp = "2025-05-01 10:11:12.345678".parse().unwrap();
        assert_eq!(ts.to_string(), "2025-05-01 10:11:12");
        assert_eq!(ts.truncated().to_string(), "2025-05-01 10:11:12");
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    #[test]
    fn timestamp_serializes_as_string() {
        let entry = HistoryEntry {
            timestamp: "2025-05-01 10:11:12".parse().unwrap(),
            label: MaskLabel::WithMask,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"2025-05-01 10:11:12","label":"With_Mask"}"#
        );
        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn summary_total_matches_counts() {
        let mut counts = CountTable::default();
        counts.with_mask = 2;
        counts.without_mask = 5;
        counts.partially_worn_mask = 1;
        let summary = SummaryRecord::new(
            "2025-05-01 10:00:00".parse().unwrap(),
            "2025-05-01 11:02:03.5".parse().unwrap(),
            counts,
        );
        assert_eq!(summary.total, 8);
        assert_eq!(summary.duration, "1:02:03.500000");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["duration"], "1:02:03.500000");
        assert_eq!(json["duration_secs"], 3723.5);
        assert_eq!(json["Total"], 8);
        assert_eq!(json["Without_Mask"], 5);
    }

    #[test]
    fn durations_without_fraction_drop_micros() {
        assert_eq!(format_duration_secs(0.0), "0:00:00");
        assert_eq!(format_duration_secs(3661.0), "1:01:01");
    }
}
