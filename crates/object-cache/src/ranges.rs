use serde::{Deserialize, Serialize};

/// A sorted, non-overlapping set of `[start, end)` byte ranges already
/// fetched for one object, the bookkeeping a partial download needs to
/// avoid re-fetching bytes it already has.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    pub fn new() -> Self {
        RangeSet::default()
    }

    pub fn covers(&self, start: u64, end: u64) -> bool {
        self.missing(start, end).is_empty()
    }

    /// Sub-ranges of `[start, end)` not yet present in this set, in order.
    pub fn missing(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        if start >= end {
            return Vec::new();
        }
        let mut cursor = start;
        let mut gaps = Vec::new();
        for &(rs, re) in &self.ranges {
            if re <= cursor || rs >= end {
                continue;
            }
            if rs > cursor {
                gaps.push((cursor, rs.min(end)));
            }
            cursor = cursor.max(re);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            gaps.push((cursor, end));
        }
        gaps
    }

    pub fn insert(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        self.ranges.push((start, end));
        self.ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.ranges.len());
        for &(rs, re) in &self.ranges {
            match merged.last_mut() {
                Some((_, last_end)) if rs <= *last_end => {
                    *last_end = (*last_end).max(re);
                }
                _ => merged.push((rs, re)),
            }
        }
        self.ranges = merged;
    }

    pub fn is_complete(&self, total_size: u64) -> bool {
        self.covers(0, total_size)
    }
}
