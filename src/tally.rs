//! Per-class running counts.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::label::MaskLabel;

/// Snapshot of the four class counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountTable {
    #[serde(rename = "Without_Mask")]
    pub without_mask: u64,
    #[serde(rename = "With_Mask")]
    pub with_mask: u64,
    #[serde(rename = "Incorrectly_Worn_Mask")]
    pub incorrectly_worn_mask: u64,
    #[serde(rename = "Partially_Worn_Mask")]
    pub partially_worn_mask: u64,
}

impl CountTable {
    pub fn get(&self, label: MaskLabel) -> u64 {
        match label {
            MaskLabel::WithoutMask => self.without_mask,
            MaskLabel::WithMask => self.with_mask,
            MaskLabel::IncorrectlyWornMask => self.incorrectly_worn_mask,
            MaskLabel::PartiallyWornMask => self.partially_worn_mask,
        }
    }

    pub fn get_mut(&mut self, label: MaskLabel) -> &mut u64 {
        match label {
            MaskLabel::WithoutMask => &mut self.without_mask,
            MaskLabel::WithMask => &mut self.with_mask,
            MaskLabel::IncorrectlyWornMask => &mut self.incorrectly_worn_mask,
            MaskLabel::PartiallyWornMask => &mut self.partially_worn_mask,
        }
    }

    pub fn total(&self) -> u64 {
        MaskLabel::ALL.iter().map(|label| self.get(*label)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaskLabel, u64)> + '_ {
        MaskLabel::ALL.into_iter().map(|label| (label, self.get(label)))
    }
}

/// Lock-free accumulator shared by the detection worker and readers.
///
/// Counters only ever grow. Each counter is independent, so a concurrent
/// `snapshot` may observe one class updated before another.
#[derive(Debug, Default)]
pub struct Tally {
    counters: [AtomicU64; 4],
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, label: MaskLabel) {
        self.counters[label.class_index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by wire name. Unknown names are ignored and return `false`.
    pub fn increment_named(&self, name: &str) -> bool {
        match name.parse::<MaskLabel>() {
            Ok(label) => {
                self.increment(label);
                true
            }
            Err(_) => {
                log::debug!("ignoring increment for unknown label '{}'", name);
                false
            }
        }
    }

    pub fn get(&self, label: MaskLabel) -> u64 {
        self.counters[label.class_index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountTable {
        let mut table = CountTable::default();
        for label in MaskLabel::ALL {
            *table.get_mut(label) = self.get(label);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_match_increment_calls() {
        let tally = Tally::new();
        let calls = [
            MaskLabel::WithMask,
            MaskLabel::WithoutMask,
            MaskLabel::WithMask,
            MaskLabel::PartiallyWornMask,
            MaskLabel::WithMask,
        ];
        for label in calls {
            tally.increment(label);
        }
        let snap = tally.snapshot();
        for label in MaskLabel::ALL {
            let expected = calls.iter().filter(|l| **l == label).count() as u64;
            assert_eq!(snap.get(label), expected);
        }
        assert_eq!(snap.total(), 5);
    }

    #[test]
    fn unknown_names_leave_counters_untouched() {
        let tally = Tally::new();
        assert!(!tally.increment_named("Face_Shield"));
        assert!(!tally.increment_named(""));
        assert_eq!(tally.snapshot(), CountTable::default());

        assert!(tally.increment_named("Incorrectly_Worn_Mask"));
        assert_eq!(tally.get(MaskLabel::IncorrectlyWornMask), 1);
    }

    #[test]
    fn snapshot_is_safe_alongside_increments() {
        let tally = Arc::new(Tally::new());
        let writer = {
            let tally = tally.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    tally.increment(MaskLabel::WithMask);
                }
            })
        };
        let mut last = 0;
        for _ in 0..100 {
            let now = tally.snapshot().with_mask;
            assert!(now >= last);
            last = now;
        }
        writer.join().unwrap();
        assert_eq!(tally.snapshot().with_mask, 1000);
    }

    #[test]
    fn count_table_serializes_with_class_names() {
        let mut table = CountTable::default();
        table.with_mask = 3;
        let json = serde_json::to_value(table).unwrap();
        assert_eq!(json["With_Mask"], 3);
        assert_eq!(json["Partially_Worn_Mask"], 0);
    }
}
