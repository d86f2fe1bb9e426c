//! Scope-id → tracker map.
//!
//! The map lock is only held for lookup, insertion and removal. Every path,
//! admission and re-arm alike, clones the tracker handle out and releases
//! the map lock before touching the tracker, so the two locks never nest and
//! work on one scope never stalls another.
//!
//! The map lock is a ticket lock: waiters are served in arrival order, so a
//! steady stream of lookups cannot starve `begin_monitor` or `stop_monitor`.

use crate::{Admission, FrequencyTracker, TrackerSnapshot};
use serde::{Deserialize, Serialize};
use spin::mutex::TicketMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uic_types::{PageKey, ScopeId};

/// What re-arming an already monitored scope does to its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RearmPolicy {
    /// Weights drop by one and the sample window restarts.
    #[default]
    Decay,
    /// The old table is discarded and an empty one takes its place.
    Recreate,
}

/// Result of [`ScopeRegistry::begin_monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Created,
    /// Existing table decayed; `dropped` entries fell off a reduced capacity.
    Decayed { dropped: usize },
    Recreated,
    /// The map could not grow. The scope stays unmonitored.
    Unmonitored,
}

/// Process-wide set of monitored scopes, owned explicitly by its user.
#[derive(Debug)]
pub struct ScopeRegistry {
    scopes: TicketMutex<HashMap<ScopeId, Arc<FrequencyTracker>>>,
    policy: RearmPolicy,
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(RearmPolicy::Decay)
    }

    #[must_use]
    pub fn with_policy(policy: RearmPolicy) -> Self {
        Self {
            scopes: TicketMutex::new(HashMap::new()),
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RearmPolicy {
        self.policy
    }

    /// Arm `scope` with a table of `capacity` slots.
    ///
    /// Unknown scopes get an empty table. Known scopes are re-armed according
    /// to the registry's [`RearmPolicy`]. The capacity is always replaced.
    pub fn begin_monitor(&self, scope: &ScopeId, capacity: u16) -> MonitorOutcome {
        let outcome = match self.policy {
            RearmPolicy::Decay => self.arm_decay(scope, capacity),
            RearmPolicy::Recreate => self.arm_recreate(scope, capacity),
        };
        info!(scope = %scope, capacity, ?outcome, "monitor_begin");
        outcome
    }

    fn arm_decay(&self, scope: &ScopeId, capacity: u16) -> MonitorOutcome {
        let existing = self.tracker(scope);
        let tracker = match existing {
            Some(tracker) => tracker,
            None => {
                let mut scopes = self.scopes.lock();
                if let Some(tracker) = scopes.get(scope).map(Arc::clone) {
                    // Armed concurrently; decay it like any other re-arm.
                    drop(scopes);
                    tracker
                } else {
                    if scopes.try_reserve(1).is_err() {
                        drop(scopes);
                        warn!(scope = %scope, capacity, "monitor_alloc_failed");
                        return MonitorOutcome::Unmonitored;
                    }
                    scopes.insert(scope.clone(), Arc::new(FrequencyTracker::new(capacity)));
                    return MonitorOutcome::Created;
                }
            }
        };
        MonitorOutcome::Decayed {
            dropped: tracker.rearm(capacity),
        }
    }

    fn arm_recreate(&self, scope: &ScopeId, capacity: u16) -> MonitorOutcome {
        let fresh = Arc::new(FrequencyTracker::new(capacity));
        let mut scopes = self.scopes.lock();
        if let Some(slot) = scopes.get_mut(scope) {
            *slot = fresh;
            return MonitorOutcome::Recreated;
        }
        if scopes.try_reserve(1).is_err() {
            drop(scopes);
            warn!(scope = %scope, capacity, "monitor_alloc_failed");
            return MonitorOutcome::Unmonitored;
        }
        scopes.insert(scope.clone(), fresh);
        MonitorOutcome::Created
    }

    /// Forget `scope` and its table. Returns whether it was monitored.
    pub fn stop_monitor(&self, scope: &ScopeId) -> bool {
        let removed = self.scopes.lock().remove(scope).is_some();
        if removed {
            info!(scope = %scope, "monitor_stop");
        }
        removed
    }

    /// Drop every scope. Used at teardown.
    pub fn clear(&self) {
        let count = {
            let mut scopes = self.scopes.lock();
            let count = scopes.len();
            scopes.clear();
            count
        };
        info!(count, "monitor_clear");
    }

    #[must_use]
    pub fn tracker(&self, scope: &ScopeId) -> Option<Arc<FrequencyTracker>> {
        self.scopes.lock().get(scope).cloned()
    }

    #[must_use]
    pub fn is_monitored(&self, scope: &ScopeId) -> bool {
        self.scopes.lock().contains_key(scope)
    }

    /// Admission gate for the store path. Unknown scope ⇒ false.
    #[must_use]
    pub fn has(&self, scope: &ScopeId, key: PageKey) -> bool {
        self.tracker(scope).is_some_and(|t| t.contains(key))
    }

    /// Feed one access into the scope's table. Unknown scope ⇒ `Ignored`.
    pub fn admit(&self, scope: &ScopeId, key: PageKey) -> Admission {
        match self.tracker(scope) {
            Some(tracker) => tracker.admit(key),
            None => Admission::Ignored,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.lock().is_empty()
    }

    /// Snapshot of every scope, ordered by scope id.
    ///
    /// Tracker handles are collected first so no tracker lock is taken while
    /// the map lock is held.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ScopeId, TrackerSnapshot)> {
        let mut handles: Vec<(ScopeId, Arc<FrequencyTracker>)> = self
            .scopes
            .lock()
            .iter()
            .map(|(id, t)| (id.clone(), Arc::clone(t)))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        handles
            .into_iter()
            .map(|(id, t)| (id, t.snapshot()))
            .collect()
    }
}
