use std::fmt;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

/// Which upstream a record was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

/// A one-sided observation waiting for its counterpart.
///
/// `first_seen` is fixed at the first sighting from that side; same-side
/// repeats never refresh it, so orphan eligibility is governed by the
/// earliest observation.
#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    side: Side,
    first_seen: Instant,
}

/// Result of a single match/store decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First sighting of this identity; it is now pending.
    Stored,
    /// The opposite side was already pending; the entry has been removed
    /// and the caller owns the joined classification for this identity.
    Matched,
    /// Same-side repeat; the existing entry (and its timestamp) stand.
    IgnoredDuplicate,
}

/// Concurrent identity table shared by the correlators and the flusher.
///
/// All observation happens through the mutating primitives below; each of
/// them decides and mutates under the map's per-key lock, which collapses
/// the check-then-act race into a single compare-and-update. For any given
/// identity, exactly one caller ever removes the entry, and that caller is
/// the unique emitter of the identity's classification.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: DashMap<String, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of identities currently pending.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Atomic match/store decision for one observation.
    pub fn decide(&self, id: &str, side: Side, now: Instant) -> Outcome {
        match self.entries.entry(id.to_owned()) {
            Entry::Occupied(existing) => {
                if existing.get().side == side {
                    Outcome::IgnoredDuplicate
                } else {
                    existing.remove();
                    Outcome::Matched
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    side,
                    first_seen: now,
                });
                Outcome::Stored
            }
        }
    }

    /// Removes and returns every identity whose entry age reached `deadline`.
    ///
    /// The returned set is exclusive: removal happens under the per-key lock
    /// with the age re-checked, so an entry that was matched and re-stored
    /// between the scan and the removal survives, and no identity can be
    /// handed to two callers.
    pub fn expire(&self, now: Instant, deadline: Duration) -> Vec<String> {
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.value().first_seen) >= deadline)
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(candidates.len());
        for id in candidates {
            let removed = self
                .entries
                .remove_if(&id, |_, entry| {
                    now.duration_since(entry.first_seen) >= deadline
                })
                .is_some();
            if removed {
                expired.push(id);
            }
        }
        expired
    }

    /// Removes and returns all remaining identities.
    pub fn drain(&self) -> Vec<String> {
        let ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.entries.remove(id).is_some())
            .collect()
    }

    /// Evicts the oldest entries above the soft cap, returning the evicted
    /// identities. Eviction is guarded by the snapshotted first-seen
    /// timestamp, so an entry that was matched and re-stored concurrently
    /// is left alone.
    pub fn trim_oldest(&self, max_size: usize) -> Vec<String> {
        let excess = self.entries.len().saturating_sub(max_size);
        if excess == 0 {
            return Vec::new();
        }

        let mut aged: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().first_seen))
            .collect();
        aged.sort_by_key(|(_, first_seen)| *first_seen);

        let mut evicted = Vec::with_capacity(excess);
        for (id, first_seen) in aged {
            if evicted.len() == excess {
                break;
            }
            let removed = self
                .entries
                .remove_if(&id, |_, entry| entry.first_seen == first_seen)
                .is_some();
            if removed {
                evicted.push(id);
            }
        }
        evicted
    }
}
