//! Conflict resolution for entries sharing a primary key.
//!
//! A policy is a pure, total function of `(incoming, existing) -> decision`,
//! deterministic so independent replicas converge to the same state
//! regardless of the order writes are observed in.

use super::entry::Entry;

/// Outcome of resolving a conflict between an incoming entry and the
/// currently-retained entry for the same primary key.
#[derive(Debug, Clone)]
pub enum ConflictDecision {
    KeepIncoming,
    KeepExisting,
    KeepMerged(Entry),
    Reject,
}

/// Resolves conflicts between entries that share a primary key.
pub trait ConflictPolicy: Send + Sync {
    fn resolve(&self, incoming: &Entry, existing: &Entry) -> ConflictDecision;
}

/// Keeps whichever entry has the larger (i.e. later-allocated) id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictPolicy for LastWriteWins {
    fn resolve(&self, incoming: &Entry, existing: &Entry) -> ConflictDecision {
        if incoming.id > existing.id {
            ConflictDecision::KeepIncoming
        } else {
            ConflictDecision::KeepExisting
        }
    }
}

/// Keeps whichever entry has the smaller id.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstWriteWins;

impl ConflictPolicy for FirstWriteWins {
    fn resolve(&self, incoming: &Entry, existing: &Entry) -> ConflictDecision {
        if incoming.id < existing.id {
            ConflictDecision::KeepIncoming
        } else {
            ConflictDecision::KeepExisting
        }
    }
}

/// Always fails the write, leaving the existing entry untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reject;

impl ConflictPolicy for Reject {
    fn resolve(&self, _incoming: &Entry, _existing: &Entry) -> ConflictDecision {
        ConflictDecision::Reject
    }
}

/// Delegates to a caller-supplied reducer that computes the replacement entry.
pub struct Merge<F>
where
    F: Fn(&Entry, &Entry) -> Entry + Send + Sync,
{
    reduce: F,
}

impl<F> Merge<F>
where
    F: Fn(&Entry, &Entry) -> Entry + Send + Sync,
{
    pub fn new(reduce: F) -> Self {
        Self { reduce }
    }
}

impl<F> ConflictPolicy for Merge<F>
where
    F: Fn(&Entry, &Entry) -> Entry + Send + Sync,
{
    fn resolve(&self, incoming: &Entry, existing: &Entry) -> ConflictDecision {
        ConflictDecision::KeepMerged((self.reduce)(incoming, existing))
    }
}
