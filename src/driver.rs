//! The detection loop.
//!
//! One run moves through
//! `INIT → RUNNING (read → infer → dedup → count/log) → TERMINATED → SUMMARY_PUBLISHED`.
//! The loop stops when the source is exhausted (a read error counts as
//! exhaustion) or the display sink reports a quit request. Quit is checked
//! once per frame, after inference. Inference and publish errors abort the
//! run without a summary.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::dedup::{FrameDeduplicator, Novelty};
use crate::detect::{Detection, SharedBackend};
use crate::frame::{annotate, Annotation, FrameSink};
use crate::ingest::FrameSource;
use crate::label::MaskLabel;
use crate::storage::StatePublisher;
use crate::tally::Tally;
use crate::{HistoryEntry, SummaryRecord, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The source returned no more frames.
    SourceExhausted,
    /// The source failed to produce a frame; treated as end of stream.
    ReadFailed,
    /// The display sink asked to quit.
    UserQuit,
}

/// What a completed run produced.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub frames: u64,
    /// Number of NEW labeled detections, i.e. history entries appended.
    pub new_detections: u64,
    pub summary: SummaryRecord,
}

pub struct DetectionLoop {
    source: Box<dyn FrameSource>,
    backend: SharedBackend,
    sink: Box<dyn FrameSink>,
    publisher: Arc<dyn StatePublisher>,
    tally: Arc<Tally>,
    dedup: FrameDeduplicator,
}

impl DetectionLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        backend: SharedBackend,
        sink: Box<dyn FrameSink>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Self {
        Self {
            source,
            backend,
            sink,
            publisher,
            tally: Arc::new(Tally::new()),
            dedup: FrameDeduplicator::new(),
        }
    }

    /// Share an existing accumulator, e.g. one a status reader also holds.
    pub fn with_tally(mut self, tally: Arc<Tally>) -> Self {
        self.tally = tally;
        self
    }

    pub fn tally(&self) -> Arc<Tally> {
        self.tally.clone()
    }

    /// Run until the source ends or quit is requested, then publish the summary.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let start_time = Timestamp::now();
        self.source.connect()?;
        {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            backend.warm_up()?;
            log::info!(
                "detection run started at {} (backend={}, source={})",
                start_time,
                backend.name(),
                self.source.stats().location
            );
        }

        let mut frames = 0u64;
        let mut new_detections = 0u64;
        let reason = loop {
            let mut frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::SourceExhausted,
                Err(err) => {
                    log::warn!("frame read failed, ending run: {:#}", err);
                    break StopReason::ReadFailed;
                }
            };
            frames += 1;

            let raw = {
                let mut backend = self
                    .backend
                    .lock()
                    .map_err(|_| anyhow!("backend lock poisoned"))?;
                backend.infer(&frame)?
            };
            let detections: Vec<Detection> = raw.into_iter().map(Detection::resolve).collect();

            let classified = self
                .dedup
                .observe(detections.iter().map(Detection::tracked).collect());
            for (tracked, novelty) in &classified {
                if *novelty != Novelty::New {
                    continue;
                }
                if let Some(label) = tracked.label {
                    self.record(label)?;
                    new_detections += 1;
                }
            }

            let annotations: Vec<Annotation> = detections
                .iter()
                .map(|d| Annotation::for_detection(d.bbox, d.label))
                .collect();
            annotate(&mut frame, &annotations);
            log::debug!(
                "frame #{}: {} detection(s), {} new",
                frame.index,
                detections.len(),
                classified
                    .iter()
                    .filter(|(t, n)| *n == Novelty::New && t.label.is_some())
                    .count()
            );

            if self.sink.show(&frame, &annotations)? {
                break StopReason::UserQuit;
            }
        };

        let end_time = Timestamp::now();
        let summary = SummaryRecord::new(start_time, end_time, self.tally.snapshot());
        log::info!(
            "detection run stopped ({:?}) after {} frame(s), {} counted",
            reason,
            frames,
            summary.total
        );
        self.publisher.publish_summary(&summary)?;
        log::info!(
            "summary published: {} total over {}",
            summary.total,
            summary.duration
        );

        Ok(RunOutcome {
            reason,
            frames,
            new_detections,
            summary,
        })
    }

    fn record(&self, label: MaskLabel) -> Result<()> {
        self.tally.increment(label);
        self.publisher.publish_increment(label)?;
        self.publisher
            .publish_history_entry(&HistoryEntry::now(label))?;
        Ok(())
    }
}
