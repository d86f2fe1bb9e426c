#![forbid(unsafe_code)]
//! Frequency-biased admission control.
//!
//! Each monitored scope owns a [`FrequencyTracker`]: a bounded table of page
//! keys kept in ascending weight order. The head of the table is always the
//! eviction candidate. A per-window sample budget caps how many admission
//! attempts one scope can make before it is re-armed, so a single cold scan
//! cannot flush the hot set.
//!
//! Trackers are reachable through a [`ScopeRegistry`], which owns the
//! scope-id → tracker map. The registry lock and each tracker's lock are
//! independent: admission on one scope never contends with another scope.
//!
//! All locks are spin locks. Callers may be running in contexts that must not
//! sleep, and every critical section is a bounded walk of one table.

mod registry;

pub use registry::{MonitorOutcome, RearmPolicy, ScopeRegistry};

use serde::{Deserialize, Serialize};
use spin::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};
use uic_types::{INIT_WEIGHT, PageKey};

/// One tracked page and its approximate access count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub key: PageKey,
    pub weight: u16,
}

/// What a call to [`FrequencyTracker::admit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The scope is not monitored.
    Ignored,
    /// The sample budget for this window is spent; nothing changed.
    WindowExhausted,
    /// Key was already tracked; its weight went up.
    Reinforced { weight: u16 },
    /// Key was added to a table that still had room.
    Inserted,
    /// Table was full; the minimum-weight entry made room for the key.
    Replaced { evicted: FrequencyEntry },
    /// Growing the table failed; the key was not recorded.
    AllocFailed,
}

impl Admission {
    /// True when the key is tracked after the call.
    #[must_use]
    pub fn is_tracked(self) -> bool {
        matches!(
            self,
            Self::Reinforced { .. } | Self::Inserted | Self::Replaced { .. }
        )
    }
}

#[derive(Debug)]
struct TableState {
    capacity: u16,
    /// Ascending by weight. Ties keep insertion order.
    entries: VecDeque<FrequencyEntry>,
    samples_seen: u16,
}

impl TableState {
    fn position(&self, key: PageKey) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    /// Index a fresh `INIT_WEIGHT` entry goes to: after every entry whose
    /// weight is not greater, so it lands at the tail of its tie group.
    fn insertion_point(&self) -> usize {
        self.entries.partition_point(|e| e.weight <= INIT_WEIGHT)
    }

    fn promote(&mut self, mut idx: usize) -> u16 {
        let weight = {
            let entry = &mut self.entries[idx];
            entry.weight = entry.weight.saturating_add(1);
            entry.weight
        };
        while idx + 1 < self.entries.len() && self.entries[idx + 1].weight < weight {
            self.entries.swap(idx, idx + 1);
            idx += 1;
        }
        weight
    }

    fn insert_fresh(&mut self, key: PageKey) -> bool {
        if self.entries.try_reserve(1).is_err() {
            return false;
        }
        let at = self.insertion_point();
        self.entries.insert(
            at,
            FrequencyEntry {
                key,
                weight: INIT_WEIGHT,
            },
        );
        true
    }

    fn admit(&mut self, key: PageKey) -> Admission {
        if self.samples_seen >= self.capacity {
            return Admission::WindowExhausted;
        }
        self.samples_seen += 1;

        if let Some(idx) = self.position(key) {
            let weight = self.promote(idx);
            return Admission::Reinforced { weight };
        }

        if self.entries.len() < usize::from(self.capacity) {
            return if self.insert_fresh(key) {
                Admission::Inserted
            } else {
                Admission::AllocFailed
            };
        }

        // Full: the head is the minimum. Popping first frees the slot the
        // new entry needs, so this path never allocates.
        let Some(evicted) = self.entries.pop_front() else {
            return Admission::AllocFailed;
        };
        let at = self.insertion_point();
        self.entries.insert(
            at,
            FrequencyEntry {
                key,
                weight: INIT_WEIGHT,
            },
        );
        Admission::Replaced { evicted }
    }

    fn decay(&mut self) {
        for entry in &mut self.entries {
            entry.weight = entry.weight.saturating_sub(1);
        }
        self.samples_seen = 0;
    }

    /// Drop lowest-weight entries until the table fits `capacity`.
    fn shrink_to_capacity(&mut self) -> usize {
        let excess = self.entries.len().saturating_sub(usize::from(self.capacity));
        self.entries.drain(..excess);
        excess
    }
}

/// Bounded top-K frequency table for one scope.
///
/// Invariants, held under the table lock after every operation:
/// - `len() <= capacity()`
/// - entries are non-decreasing by weight, head first
/// - `samples_seen() <= capacity()`
#[derive(Debug)]
pub struct FrequencyTracker {
    state: Mutex<TableState>,
}

impl FrequencyTracker {
    #[must_use]
    pub fn new(capacity: u16) -> Self {
        Self {
            state: Mutex::new(TableState {
                capacity,
                entries: VecDeque::new(),
                samples_seen: 0,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.state.lock().capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Every slot is taken; the next unseen key will replace the head.
    #[must_use]
    pub fn is_full(&self) -> bool {
        let state = self.state.lock();
        state.entries.len() >= usize::from(state.capacity)
    }

    #[must_use]
    pub fn samples_seen(&self) -> u16 {
        self.state.lock().samples_seen
    }

    /// The sample budget for the current window is spent.
    #[must_use]
    pub fn window_exhausted(&self) -> bool {
        let state = self.state.lock();
        state.samples_seen >= state.capacity
    }

    /// Admission gate: is `key` currently tracked?
    #[must_use]
    pub fn contains(&self, key: PageKey) -> bool {
        self.state.lock().position(key).is_some()
    }

    #[must_use]
    pub fn weight_of(&self, key: PageKey) -> Option<u16> {
        let state = self.state.lock();
        state.position(key).map(|idx| state.entries[idx].weight)
    }

    /// Record one access to `key`.
    ///
    /// A known key gains one unit of weight and moves toward the tail. An
    /// unknown key enters at `INIT_WEIGHT`, replacing the head when the
    /// table is full. Once `capacity` attempts have been made in the current
    /// window, further calls change nothing until [`Self::rearm`].
    pub fn admit(&self, key: PageKey) -> Admission {
        let outcome = self.state.lock().admit(key);
        match outcome {
            Admission::Replaced { evicted } => debug!(
                key = key.0,
                evicted = evicted.key.0,
                evicted_weight = evicted.weight,
                "freq_replace_head"
            ),
            Admission::AllocFailed => warn!(key = key.0, "freq_insert_alloc_failed"),
            _ => {}
        }
        outcome
    }

    /// Start a new window: every weight drops by one (floor zero), the sample
    /// counter resets, and the capacity is replaced.
    ///
    /// If the new capacity is smaller than the table, the lowest-weight
    /// entries are dropped. Returns how many entries were dropped.
    pub fn rearm(&self, capacity: u16) -> usize {
        let mut state = self.state.lock();
        state.decay();
        state.capacity = capacity;
        state.shrink_to_capacity()
    }

    /// Copy of the table, head first.
    #[must_use]
    pub fn entries(&self) -> Vec<FrequencyEntry> {
        self.state.lock().entries.iter().copied().collect()
    }

    /// Consistent view of the whole tracker taken under one lock.
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock();
        TrackerSnapshot {
            capacity: state.capacity,
            samples_seen: state.samples_seen,
            entries: state.entries.iter().copied().collect(),
        }
    }
}

/// Point-in-time copy of one tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub capacity: u16,
    pub samples_seen: u16,
    /// Head (eviction candidate) first.
    pub entries: Vec<FrequencyEntry>,
}

impl TrackerSnapshot {
    #[must_use]
    pub fn min_weight(&self) -> Option<u16> {
        self.entries.first().map(|e| e.weight)
    }

    #[must_use]
    pub fn max_weight(&self) -> Option<u16> {
        self.entries.last().map(|e| e.weight)
    }

    #[must_use]
    pub fn is_ascending(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].weight <= w[1].weight)
    }
}
