//! Compaction strategies: pure functions from an entry sequence to a
//! retained subset. Never reorder retained entries.

use super::entry::Entry;

/// A strategy for filtering entries before replay or persistence.
pub trait CompactionStrategy: Send + Sync {
    /// Returns the subset of `entries` to retain, preserving their order.
    /// `now_millis` is the reference "now" for age-based strategies.
    fn retain(&self, entries: &[Entry], now_millis: u64) -> Vec<Entry>;
}

/// Drops entries older than `now - max_age_ms`.
pub struct ByAge {
    pub max_age_ms: u64,
}

impl CompactionStrategy for ByAge {
    fn retain(&self, entries: &[Entry], now_millis: u64) -> Vec<Entry> {
        let cutoff = now_millis.saturating_sub(self.max_age_ms);
        entries
            .iter()
            .filter(|e| e.id.millis() >= cutoff)
            .cloned()
            .collect()
    }
}

/// Retains the newest `max_entries`; `0` retains none.
pub struct ByCount {
    pub max_entries: usize,
}

impl CompactionStrategy for ByCount {
    fn retain(&self, entries: &[Entry], _now_millis: u64) -> Vec<Entry> {
        if self.max_entries == 0 || entries.is_empty() {
            return Vec::new();
        }
        let skip = entries.len().saturating_sub(self.max_entries);
        entries[skip..].to_vec()
    }
}

/// Scans newest-first, keeping entries whose cumulative payload size does
/// not exceed `max_bytes`; `0` retains none.
pub struct BySize {
    pub max_bytes: usize,
}

impl CompactionStrategy for BySize {
    fn retain(&self, entries: &[Entry], _now_millis: u64) -> Vec<Entry> {
        if self.max_bytes == 0 {
            return Vec::new();
        }
        let mut kept_ids = std::collections::HashSet::new();
        let mut total = 0usize;
        for e in entries.iter().rev() {
            let size = e.payload.len();
            if total + size > self.max_bytes {
                continue;
            }
            total += size;
            kept_ids.insert(e.id);
        }
        entries
            .iter()
            .filter(|e| kept_ids.contains(&e.id))
            .cloned()
            .collect()
    }
}

/// Applies strategies in order; the retained set is the intersection of
/// every strategy's retention.
pub struct Composite {
    strategies: Vec<Box<dyn CompactionStrategy>>,
}

impl Composite {
    pub fn new(strategies: Vec<Box<dyn CompactionStrategy>>) -> Self {
        Self { strategies }
    }
}

impl CompactionStrategy for Composite {
    fn retain(&self, entries: &[Entry], now_millis: u64) -> Vec<Entry> {
        let mut current = entries.to_vec();
        for strategy in &self.strategies {
            current = strategy.retain(&current, now_millis);
        }
        current
    }
}
