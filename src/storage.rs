//! Shared state publishers.
//!
//! The detection loop is the single writer; dashboards and the snapshot API
//! are readers. Two realizations share the [`StatePublisher`] contract:
//!
//! - [`InMemoryStatePublisher`]: one `RwLock`-guarded state shared across
//!   threads. Each call is atomic on its own, and reads return a copy taken
//!   at one version.
//! - [`SqliteStatePublisher`]: every write is its own committed statement.
//!   Counts are never stored; they are recomputed from the history rows.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::{Mutex, RwLock};

use crate::label::MaskLabel;
use crate::tally::CountTable;
use crate::{
    open_db_connection, open_db_connection_read_only, HistoryEntry, SummaryRecord, Timestamp,
};

/// Default number of history rows a dashboard displays.
pub const DEFAULT_HISTORY_WINDOW: usize = 100;

/// What a dashboard poll returns.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StateView {
    /// Monotonic write counter; `0` when the backend does not version reads.
    pub version: u64,
    pub counts: CountTable,
    pub total: u64,
    /// Most recent entries first.
    pub history: Vec<HistoryEntry>,
}

pub trait StatePublisher: Send + Sync {
    /// Record that one NEW detection of `label` was counted.
    fn publish_increment(&self, label: MaskLabel) -> Result<()>;

    /// Append one history entry.
    fn publish_history_entry(&self, entry: &HistoryEntry) -> Result<()>;

    /// Store the terminal record of a run.
    fn publish_summary(&self, summary: &SummaryRecord) -> Result<()>;

    /// Current per-class counts. Every class is present, zero if unseen.
    fn read_snapshot(&self) -> Result<CountTable>;

    /// Up to `limit` history entries, most recent first.
    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// All summary records, oldest first.
    fn summaries(&self) -> Result<Vec<SummaryRecord>>;

    /// The summary record published at `timestamp`, if any.
    fn summary_at(&self, timestamp: &Timestamp) -> Result<Option<SummaryRecord>> {
        let key = timestamp.to_string();
        Ok(self
            .summaries()?
            .into_iter()
            .find(|summary| summary.timestamp.to_string() == key))
    }

    /// Counts plus recent history. The default issues two independent
    /// reads, so a writer may land between them.
    fn read_view(&self, history_limit: usize) -> Result<StateView> {
        let counts = self.read_snapshot()?;
        let history = self.recent_history(history_limit)?;
        Ok(StateView {
            version: 0,
            counts,
            total: counts.total(),
            history,
        })
    }
}

fn check_summary(summary: &SummaryRecord) -> Result<()> {
    if summary.total != summary.counts.total() {
        return Err(anyhow!(
            "summary total {} does not match class counts ({})",
            summary.total,
            summary.counts.total()
        ));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// In-memory publisher
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    version: u64,
    counts: CountTable,
    history: Vec<HistoryEntry>,
    summaries: Vec<SummaryRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryStatePublisher {
    state: RwLock<MemoryState>,
}

impl InMemoryStatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn write<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| anyhow!("state lock poisoned"))?;
        let out = f(&mut guard);
        guard.version += 1;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> Result<T> {
        let guard = self
            .state
            .read()
            .map_err(|_| anyhow!("state lock poisoned"))?;
        Ok(f(&guard))
    }
}

impl StatePublisher for InMemoryStatePublisher {
    fn publish_increment(&self, label: MaskLabel) -> Result<()> {
        self.write(|state| *state.counts.get_mut(label) += 1)
    }

    fn publish_history_entry(&self, entry: &HistoryEntry) -> Result<()> {
        self.write(|state| state.history.push(entry.clone()))
    }

    fn publish_summary(&self, summary: &SummaryRecord) -> Result<()> {
        check_summary(summary)?;
        self.write(|state| state.summaries.push(summary.clone()))
    }

    fn read_snapshot(&self) -> Result<CountTable> {
        self.read(|state| state.counts)
    }

    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.read(|state| state.history.iter().rev().take(limit).cloned().collect())
    }

    fn summaries(&self) -> Result<Vec<SummaryRecord>> {
        self.read(|state| state.summaries.clone())
    }

    fn read_view(&self, history_limit: usize) -> Result<StateView> {
        self.read(|state| StateView {
            version: state.version,
            counts: state.counts,
            total: state.counts.total(),
            history: state
                .history
                .iter()
                .rev()
                .take(history_limit)
                .cloned()
                .collect(),
        })
    }
}

// ----------------------------------------------------------------------------
// SQLite publisher
// ----------------------------------------------------------------------------

pub struct SqliteStatePublisher {
    conn: Mutex<Connection>,
}

impl SqliteStatePublisher {
    /// Open (or create) the store at `db_path`. `file:` URIs are honored.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("failed to open database {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open an existing store read-only, for inspection tools.
    ///
    /// Nothing is created: a missing file or a database without the tally
    /// tables is an error, and every publish call fails.
    pub fn open_existing(db_path: &str) -> Result<Self> {
        let conn = open_db_connection_read_only(db_path)
            .with_context(|| format!("failed to open existing database {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.with_conn(|conn| {
            let tables: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE type = 'table' AND name IN ('mask_stats', 'mask_summary')",
                [],
                |row| row.get(0),
            )?;
            if tables != 2 {
                return Err(anyhow!("{} is not a mask tally database", db_path));
            }
            Ok(())
        })?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;

                CREATE TABLE IF NOT EXISTS mask_stats (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  timestamp TEXT NOT NULL,
                  label TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS mask_summary (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  timestamp TEXT NOT NULL,
                  With_Mask INTEGER NOT NULL,
                  Without_Mask INTEGER NOT NULL,
                  Incorrectly_Worn_Mask INTEGER NOT NULL,
                  Partially_Worn_Mask INTEGER NOT NULL,
                  Total INTEGER NOT NULL,
                  start_time TEXT NOT NULL,
                  end_time TEXT NOT NULL,
                  duration TEXT NOT NULL,
                  duration_secs REAL NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_mask_stats_timestamp ON mask_stats(timestamp);
                CREATE INDEX IF NOT EXISTS idx_mask_summary_timestamp ON mask_summary(timestamp);
                "#,
            )?;
            Ok(())
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        f(&guard)
    }

    /// Number of history rows, regardless of label.
    pub fn history_len(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM mask_stats", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

const SUMMARY_COLUMNS: &str = "timestamp, With_Mask, Without_Mask, Incorrectly_Worn_Mask, \
     Partially_Worn_Mask, Total, start_time, end_time, duration, duration_secs";

fn summary_from_row(row: &rusqlite::Row<'_>) -> Result<SummaryRecord> {
    let timestamp: String = row.get(0)?;
    let counts = CountTable {
        with_mask: row.get::<_, i64>(1)? as u64,
        without_mask: row.get::<_, i64>(2)? as u64,
        incorrectly_worn_mask: row.get::<_, i64>(3)? as u64,
        partially_worn_mask: row.get::<_, i64>(4)? as u64,
    };
    let total: i64 = row.get(5)?;
    let start_time: String = row.get(6)?;
    let end_time: String = row.get(7)?;
    let duration: String = row.get(8)?;
    let duration_secs: f64 = row.get(9)?;
    Ok(SummaryRecord {
        timestamp: timestamp.parse()?,
        start_time: start_time.parse()?,
        end_time: end_time.parse()?,
        duration,
        duration_secs,
        counts,
        total: total as u64,
    })
}

impl StatePublisher for SqliteStatePublisher {
    fn publish_increment(&self, _label: MaskLabel) -> Result<()> {
        // Counts are derived from mask_stats rows on read.
        Ok(())
    }

    fn publish_history_entry(&self, entry: &HistoryEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO mask_stats (timestamp, label) VALUES (?1, ?2)",
                params![entry.timestamp.to_string(), entry.label.as_str()],
            )?;
            Ok(())
        })
    }

    fn publish_summary(&self, summary: &SummaryRecord) -> Result<()> {
        check_summary(summary)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO mask_summary (
                  timestamp, With_Mask, Without_Mask, Incorrectly_Worn_Mask,
                  Partially_Worn_Mask, Total, start_time, end_time, duration, duration_secs
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    summary.timestamp.to_string(),
                    summary.counts.with_mask as i64,
                    summary.counts.without_mask as i64,
                    summary.counts.incorrectly_worn_mask as i64,
                    summary.counts.partially_worn_mask as i64,
                    summary.total as i64,
                    summary.start_time.to_string(),
                    summary.end_time.to_string(),
                    summary.duration,
                    summary.duration_secs,
                ],
            )?;
            Ok(())
        })
    }

    fn read_snapshot(&self) -> Result<CountTable> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT label, COUNT(*) FROM mask_stats GROUP BY label")?;
            let mut rows = stmt.query([])?;
            let mut counts = CountTable::default();
            while let Some(row) = rows.next()? {
                let label: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                match label.parse::<MaskLabel>() {
                    Ok(label) => *counts.get_mut(label) = count as u64,
                    Err(_) => log::warn!("ignoring {} history row(s) with label '{}'", count, label),
                }
            }
            Ok(counts)
        })
    }

    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, label FROM mask_stats \
                 WHERE label IN (?1, ?2, ?3, ?4) \
                 ORDER BY timestamp DESC, id DESC LIMIT ?5",
            )?;
            let [a, b, c, d] = MaskLabel::ALL.map(MaskLabel::as_str);
            let mut rows = stmt.query(params![a, b, c, d, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let timestamp: String = row.get(0)?;
                let label: String = row.get(1)?;
                out.push(HistoryEntry {
                    timestamp: timestamp.parse()?,
                    label: label.parse()?,
                });
            }
            Ok(out)
        })
    }

    fn summaries(&self) -> Result<Vec<SummaryRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM mask_summary ORDER BY id ASC",
                SUMMARY_COLUMNS
            ))?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(summary_from_row(row)?);
            }
            Ok(out)
        })
    }

    fn summary_at(&self, timestamp: &Timestamp) -> Result<Option<SummaryRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM mask_summary WHERE timestamp = ?1 ORDER BY id ASC LIMIT 1",
                SUMMARY_COLUMNS
            ))?;
            let raw = stmt
                .query_row(params![timestamp.to_string()], |row| {
                    Ok(summary_from_row(row))
                })
                .optional()?;
            raw.transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory_uri;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn entry(s: &str, label: MaskLabel) -> HistoryEntry {
        HistoryEntry {
            timestamp: ts(s),
            label,
        }
    }

    #[test]
    fn memory_view_is_versioned_and_newest_first() {
        let store = InMemoryStatePublisher::new();
        store.publish_increment(MaskLabel::WithMask).unwrap();
        store
            .publish_history_entry(&entry("2025-05-01 10:00:00", MaskLabel::WithMask))
            .unwrap();
        store.publish_increment(MaskLabel::WithoutMask).unwrap();
        store
            .publish_history_entry(&entry("2025-05-01 10:00:05", MaskLabel::WithoutMask))
            .unwrap();

        let view = store.read_view(DEFAULT_HISTORY_WINDOW).unwrap();
        assert_eq!(view.version, 4);
        assert_eq!(view.total, 2);
        assert_eq!(view.history[0].label, MaskLabel::WithoutMask);
        assert_eq!(store.recent_history(1).unwrap().len(), 1);
    }

    #[test]
    fn sqlite_counts_are_recomputed_from_history() {
        let store = SqliteStatePublisher::open(":memory:").unwrap();
        for i in 0..3 {
            store
                .publish_history_entry(&entry(
                    &format!("2025-05-01 10:00:0{}", i),
                    MaskLabel::WithMask,
                ))
                .unwrap();
        }
        store
            .publish_history_entry(&entry("2025-05-01 10:00:09", MaskLabel::WithoutMask))
            .unwrap();
        // Increments alone never change the durable counts.
        store.publish_increment(MaskLabel::PartiallyWornMask).unwrap();

        let counts = store.read_snapshot().unwrap();
        assert_eq!(counts.with_mask, 3);
        assert_eq!(counts.without_mask, 1);
        assert_eq!(counts.incorrectly_worn_mask, 0);
        assert_eq!(counts.partially_worn_mask, 0);
        assert_eq!(store.history_len().unwrap(), 4);
    }

    #[test]
    fn sqlite_empty_store_reads_as_zero() {
        let store = SqliteStatePublisher::open(":memory:").unwrap();
        assert_eq!(store.read_snapshot().unwrap(), CountTable::default());
        assert!(store.recent_history(10).unwrap().is_empty());
        assert!(store.summaries().unwrap().is_empty());
    }

    #[test]
    fn sqlite_summary_lookup_by_timestamp() {
        let store = SqliteStatePublisher::open(":memory:").unwrap();
        let mut counts = CountTable::default();
        counts.with_mask = 4;
        counts.incorrectly_worn_mask = 1;
        let summary = SummaryRecord::new(
            ts("2025-05-01 09:00:00"),
            ts("2025-05-01 09:30:00"),
            counts,
        );
        store.publish_summary(&summary).unwrap();

        let found = store
            .summary_at(&ts("2025-05-01 09:30:00"))
            .unwrap()
            .expect("summary");
        assert_eq!(found.counts, counts);
        assert_eq!(found.total, 5);
        assert_eq!(found.duration_secs, 1800.0);
        assert_eq!(found.duration, "0:30:00");
        assert!(store.summary_at(&ts("2025-05-01 09:31:00")).unwrap().is_none());
    }

    #[test]
    fn inconsistent_summary_is_rejected() {
        let store = InMemoryStatePublisher::new();
        let mut summary = SummaryRecord::new(
            ts("2025-05-01 09:00:00"),
            ts("2025-05-01 09:00:10"),
            CountTable::default(),
        );
        summary.total = 3;
        assert!(store.publish_summary(&summary).is_err());
    }

    #[test]
    fn sqlite_history_window_skips_unknown_labels_before_limit() {
        let store = SqliteStatePublisher::open(":memory:").unwrap();
        store
            .publish_history_entry(&entry("2025-05-01 10:00:00", MaskLabel::WithMask))
            .unwrap();
        store
            .publish_history_entry(&entry("2025-05-01 10:00:01", MaskLabel::WithoutMask))
            .unwrap();
        store
            .with_conn(|conn| {
                for second in 2..5 {
                    conn.execute(
                        "INSERT INTO mask_stats (timestamp, label) VALUES (?1, 'Face_Shield')",
                        params![format!("2025-05-01 10:00:0{}", second)],
                    )?;
                }
                Ok(())
            })
            .unwrap();

        let history = store.recent_history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].label, MaskLabel::WithoutMask);
        assert_eq!(history[1].label, MaskLabel::WithMask);
        assert_eq!(store.read_snapshot().unwrap().total(), 2);
    }

    #[test]
    fn read_only_open_rejects_missing_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("typo.db");
        assert!(SqliteStatePublisher::open_existing(missing.to_str().unwrap()).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn read_only_open_reads_but_never_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tally.db");
        let path = path.to_str().unwrap();
        {
            let writer = SqliteStatePublisher::open(path).unwrap();
            writer
                .publish_history_entry(&entry("2025-05-01 10:00:00", MaskLabel::WithMask))
                .unwrap();
        }

        let reader = SqliteStatePublisher::open_existing(path).unwrap();
        assert_eq!(reader.read_snapshot().unwrap().with_mask, 1);
        assert!(reader
            .publish_history_entry(&entry("2025-05-01 10:00:01", MaskLabel::WithMask))
            .is_err());
        assert_eq!(reader.history_len().unwrap(), 1);
    }

    #[test]
    fn read_only_open_rejects_foreign_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("other.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE notes (body TEXT);")
            .unwrap();
        assert!(SqliteStatePublisher::open_existing(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn sqlite_readers_on_separate_connections_see_commits() {
        let uri = shared_memory_uri();
        let writer = SqliteStatePublisher::open(&uri).unwrap();
        let reader = SqliteStatePublisher::open(&uri).unwrap();
        writer
            .publish_history_entry(&entry("2025-05-01 10:00:00", MaskLabel::IncorrectlyWornMask))
            .unwrap();
        assert_eq!(reader.read_snapshot().unwrap().incorrectly_worn_mask, 1);
    }
}
