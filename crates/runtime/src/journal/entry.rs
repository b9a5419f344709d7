//! Entry identity: a 128-bit, time-sortable id and the atomic unit of the journal.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonically assigned identifier: millisecond timestamp in the high 64
/// bits, a per-millisecond counter in the low 64 bits. Sortable both
/// lexicographically (as the underlying `u128`) and by wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u128);

impl EntryId {
    pub fn new(millis: u64, counter: u64) -> Self {
        Self(((millis as u128) << 64) | counter as u128)
    }

    pub fn millis(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub fn counter(&self) -> u64 {
        (self.0 & u64::MAX as u128) as u64
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The atomic, immutable unit of a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub event: String,
    pub primary_key: String,
    pub payload: Bytes,
}

/// Allocates strictly increasing [`EntryId`]s.
///
/// On clock regression the previous millisecond value is reused and the
/// counter continues, so ids stay strictly increasing even if the wall
/// clock moves backward.
pub struct IdAllocator {
    state: Mutex<(u64, u64)>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((0, 0)),
        }
    }

    /// Resume allocation after the given id, so subsequently allocated ids
    /// are guaranteed to be strictly greater.
    pub fn resume_after(&self, last: EntryId) {
        let mut state = self.state.lock();
        if last.millis() > state.0 || (last.millis() == state.0 && last.counter() >= state.1) {
            *state = (last.millis(), last.counter() + 1);
        }
    }

    pub fn allocate(&self) -> EntryId {
        self.allocate_at(current_millis())
    }

    fn allocate_at(&self, now_millis: u64) -> EntryId {
        let mut state = self.state.lock();
        let (last_millis, last_counter) = *state;

        let (millis, counter) = if now_millis > last_millis {
            (now_millis, 0)
        } else {
            // Clock did not advance (or regressed): reuse the previous
            // millisecond and keep the counter strictly increasing.
            (last_millis, last_counter.saturating_add(1))
        };

        *state = (millis, counter);
        EntryId::new(millis, counter)
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let alloc = IdAllocator::new();
        let mut prev = alloc.allocate();
        for _ in 0..1000 {
            let next = alloc.allocate();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn same_millisecond_increments_counter() {
        let alloc = IdAllocator::new();
        let a = alloc.allocate_at(1_000);
        let b = alloc.allocate_at(1_000);
        assert_eq!(a.millis(), b.millis());
        assert_eq!(b.counter(), a.counter() + 1);
        assert!(b > a);
    }

    #[test]
    fn clock_regression_reuses_previous_millisecond() {
        let alloc = IdAllocator::new();
        let a = alloc.allocate_at(5_000);
        let b = alloc.allocate_at(4_000); // clock moved backward
        assert_eq!(b.millis(), a.millis());
        assert!(b > a);
    }

    #[test]
    fn entry_id_roundtrips_millis_and_counter() {
        let id = EntryId::new(123_456, 7);
        assert_eq!(id.millis(), 123_456);
        assert_eq!(id.counter(), 7);
    }

    #[test]
    fn resume_after_prevents_reissuing_ids() {
        let alloc = IdAllocator::new();
        let persisted_last = EntryId::new(10_000, 3);
        alloc.resume_after(persisted_last);
        let next = alloc.allocate_at(10_000);
        assert!(next > persisted_last);
    }
}
