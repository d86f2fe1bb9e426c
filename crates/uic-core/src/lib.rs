#![forbid(unsafe_code)]
//! Admission-gated page cache.
//!
//! [`Coordinator`] sits between a page-lifecycle hook layer and two
//! independent components:
//!
//! - a [`ScopeRegistry`] of per-scope frequency tables that decides which
//!   pages are worth caching, and
//! - a [`ContentStore`] that holds the bytes of admitted pages, keyed by swap
//!   slot, under a fixed page budget.
//!
//! # Protocols
//!
//! | Event | Effect |
//! |-------|--------|
//! | store attempt | cache the bytes only if the page is tracked by its scope |
//! | load attempt | serve from the cache on hit and reinforce the page's score |
//! | invalidate slot / area | drop cached bytes |
//! | page charged | feed the scope's frequency table |
//!
//! The coordinator calls the registry and the store one after the other and
//! never holds a lock of one while calling the other.
//!
//! Every failure on these paths is local: the caller falls back to the real
//! device and the cache is simply not used for that page.

mod config;
mod control;
mod report;
mod swap;
mod trace;

pub use config::CacheConfig;
pub use control::{ControlCommand, ControlOutcome};
pub use report::{CacheReport, ScopeReport};
pub use swap::{FrontCache, MemSwapDevice, SwapDevice, SwapInSource, SwapOutTarget};
pub use trace::{ReplaySummary, TraceEvent, parse_trace, replay};
pub use uic_freq::{
    Admission, FrequencyEntry, FrequencyTracker, MonitorOutcome, RearmPolicy, ScopeRegistry,
    TrackerSnapshot,
};
pub use uic_store::{ContentStore, StoreOutcome};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace};
use uic_error::{Result, UicError};
use uic_types::{AreaId, PAGE_SIZE, PageBuf, PageKey, ScopeId, SwapKey};

// ── Counters ───────────────────────────────────────────────────────────────

/// Event counters. Relaxed: they feed reports, not decisions.
#[derive(Debug, Default)]
struct CoordinatorStats {
    store_cached: AtomicU64,
    store_not_admitted: AtomicU64,
    store_declined: AtomicU64,
    load_hits: AtomicU64,
    load_misses: AtomicU64,
    invalidations: AtomicU64,
    charges: AtomicU64,
}

impl CoordinatorStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            store_cached: self.store_cached.load(Ordering::Relaxed),
            store_not_admitted: self.store_not_admitted.load(Ordering::Relaxed),
            store_declined: self.store_declined.load(Ordering::Relaxed),
            load_hits: self.load_hits.load(Ordering::Relaxed),
            load_misses: self.load_misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            charges: self.charges.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub store_cached: u64,
    pub store_not_admitted: u64,
    pub store_declined: u64,
    pub load_hits: u64,
    pub load_misses: u64,
    pub invalidations: u64,
    pub charges: u64,
}

impl StatsSnapshot {
    /// Load hit rate as a fraction in [0.0, 1.0].
    #[must_use]
    #[expect(clippy::cast_precision_loss)] // counters stay far below 2^52
    pub fn hit_rate(&self) -> f64 {
        let total = self.load_hits + self.load_misses;
        if total == 0 {
            return 0.0;
        }
        self.load_hits as f64 / total as f64
    }
}

// ── Store path ─────────────────────────────────────────────────────────────

/// Outcome of [`Coordinator::on_store_attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePath {
    /// The page is not tracked by its scope; the device gets it.
    NotAdmitted,
    /// The bytes are in the cache; the device write can be skipped.
    Cached(StoreOutcome),
    /// Admitted, but the store was full or allocation failed.
    Declined,
}

impl StorePath {
    #[must_use]
    pub fn is_cached(self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

// ── Coordinator ────────────────────────────────────────────────────────────

/// Sequences admission and content storage for the hook layer.
#[derive(Debug)]
pub struct Coordinator {
    config: CacheConfig,
    scopes: ScopeRegistry,
    content: ContentStore,
    stats: CoordinatorStats,
}

impl Coordinator {
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let content = ContentStore::new(config.max_entries, config.resolved_shards());
        let scopes = ScopeRegistry::with_policy(config.rearm_policy);
        info!(
            max_entries = config.max_entries,
            policy = ?config.rearm_policy,
            "coordinator: initializing"
        );
        Ok(Self {
            config,
            scopes,
            content,
            stats: CoordinatorStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    #[must_use]
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    pub fn begin_monitor(&self, scope: &ScopeId, capacity: u16) -> MonitorOutcome {
        self.scopes.begin_monitor(scope, capacity)
    }

    pub fn stop_monitor(&self, scope: &ScopeId) -> bool {
        self.scopes.stop_monitor(scope)
    }

    /// Execute a parsed admin control line.
    pub fn apply(&self, command: &ControlCommand) -> ControlOutcome {
        match command {
            ControlCommand::Monitor { scope, capacity } => ControlOutcome::Monitor(
                self.begin_monitor(scope, capacity.unwrap_or(self.config.default_capacity)),
            ),
            ControlCommand::Stop { scope } => ControlOutcome::Stopped {
                was_monitored: self.stop_monitor(scope),
            },
        }
    }

    /// Parse and execute one admin control line.
    pub fn apply_line(&self, line: &str) -> Result<ControlOutcome> {
        let command = ControlCommand::parse(line)?;
        Ok(self.apply(&command))
    }

    /// Drop every scope and every cached page.
    pub fn teardown(&self) {
        self.scopes.clear();
        let dropped = self.content.clear();
        info!(dropped, "coordinator_teardown");
    }

    // ── Protocols ──────────────────────────────────────────────────────────

    /// Page `page` of `scope` is about to be written to swap slot `key`.
    ///
    /// Only pages tracked by their scope are cached. When the page is not
    /// cached, any bytes still held for `key` are dropped: the device copy
    /// is about to become the newer one.
    pub fn on_store_attempt(
        &self,
        scope: &ScopeId,
        page: PageKey,
        key: SwapKey,
        bytes: &[u8],
    ) -> Result<StorePath> {
        if bytes.len() != PAGE_SIZE {
            return Err(UicError::InvalidPageLength {
                got: bytes.len(),
                expected: PAGE_SIZE,
            });
        }

        if !self.scopes.has(scope, page) {
            self.content.delete(key);
            CoordinatorStats::bump(&self.stats.store_not_admitted);
            return Ok(StorePath::NotAdmitted);
        }

        match self.content.store(key, bytes) {
            Ok(outcome) => {
                CoordinatorStats::bump(&self.stats.store_cached);
                trace!(scope = %scope, page = page.0, key = %key, ?outcome, "store_cached");
                Ok(StorePath::Cached(outcome))
            }
            Err(err) if err.is_declined() => {
                self.content.delete(key);
                CoordinatorStats::bump(&self.stats.store_declined);
                debug!(scope = %scope, key = %key, error = %err, "store_declined");
                Ok(StorePath::Declined)
            }
            Err(err) => Err(err),
        }
    }

    /// Swap slot `key` is about to be read back into page `page`.
    ///
    /// On a hit the bytes are returned and, when the owning scope is known,
    /// the page's score in that scope is reinforced. A miss changes nothing.
    #[must_use]
    pub fn on_load_attempt(
        &self,
        scope: Option<&ScopeId>,
        page: PageKey,
        key: SwapKey,
    ) -> Option<PageBuf> {
        let Some(bytes) = self.content.load(key) else {
            CoordinatorStats::bump(&self.stats.load_misses);
            trace!(key = %key, "load_miss");
            return None;
        };
        CoordinatorStats::bump(&self.stats.load_hits);
        self.reinforce(scope, page, key);
        Some(bytes)
    }

    /// Like [`Self::on_load_attempt`], copying into a caller-owned page.
    pub fn on_load_into(
        &self,
        scope: Option<&ScopeId>,
        page: PageKey,
        key: SwapKey,
        dst: &mut [u8],
    ) -> Result<bool> {
        let hit = self.content.load_into(key, dst)?;
        if hit {
            CoordinatorStats::bump(&self.stats.load_hits);
            self.reinforce(scope, page, key);
        } else {
            CoordinatorStats::bump(&self.stats.load_misses);
            trace!(key = %key, "load_miss");
        }
        Ok(hit)
    }

    fn reinforce(&self, scope: Option<&ScopeId>, page: PageKey, key: SwapKey) {
        let admission = scope.map_or(Admission::Ignored, |s| self.scopes.admit(s, page));
        trace!(key = %key, page = page.0, ?admission, "load_hit");
    }

    /// Swap slot `key` no longer holds valid data.
    pub fn on_invalidate(&self, key: SwapKey) -> bool {
        let removed = self.content.delete(key);
        if removed {
            CoordinatorStats::bump(&self.stats.invalidations);
        }
        removed
    }

    /// Swap area `area` is being torn down.
    pub fn on_invalidate_area(&self, area: AreaId) -> usize {
        let removed = self.content.delete_area(area);
        CoordinatorStats::add(&self.stats.invalidations, removed);
        removed
    }

    /// Page `page` became resident under `scope`.
    pub fn on_page_charged(&self, scope: &ScopeId, page: PageKey) -> Admission {
        CoordinatorStats::bump(&self.stats.charges);
        self.scopes.admit(scope, page)
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    /// Read-only dump of every scope and the store occupancy.
    #[must_use]
    pub fn report(&self) -> CacheReport {
        CacheReport {
            scopes: self
                .scopes
                .snapshot()
                .into_iter()
                .map(|(scope, snapshot)| ScopeReport::from_snapshot(scope, snapshot))
                .collect(),
            stored_pages: self.content.len(),
            max_entries: self.content.max_entries(),
            stats: self.stats.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(max_entries: usize) -> Coordinator {
        Coordinator::new(CacheConfig {
            max_entries,
            shard_count: 2,
            ..CacheConfig::default()
        })
        .expect("coordinator")
    }

    fn scope(name: &str) -> ScopeId {
        ScopeId::new(name).expect("scope")
    }

    #[test]
    fn store_path_is_gated_by_admission() {
        let c = coordinator(8);
        let s = scope("/ui");
        let key = SwapKey::new(0, 10);
        let data = [1_u8; PAGE_SIZE];

        assert_eq!(
            c.on_store_attempt(&s, PageKey(5), key, &data).expect("sized"),
            StorePath::NotAdmitted,
            "unmonitored scope never caches"
        );

        c.begin_monitor(&s, 4);
        assert_eq!(
            c.on_store_attempt(&s, PageKey(5), key, &data).expect("sized"),
            StorePath::NotAdmitted,
            "untracked page is not cached"
        );

        c.on_page_charged(&s, PageKey(5));
        assert!(
            c.on_store_attempt(&s, PageKey(5), key, &data)
                .expect("sized")
                .is_cached()
        );
        assert_eq!(c.content().len(), 1);
    }

    #[test]
    fn load_hit_reinforces_score() {
        let c = coordinator(8);
        let s = scope("/ui");
        let key = SwapKey::new(0, 1);
        c.begin_monitor(&s, 8);
        c.on_page_charged(&s, PageKey(9));
        c.on_store_attempt(&s, PageKey(9), key, &[4_u8; PAGE_SIZE])
            .expect("sized");

        let before = c.scopes().tracker(&s).expect("tracker").weight_of(PageKey(9));
        let page = c.on_load_attempt(Some(&s), PageKey(9), key).expect("hit");
        assert_eq!(page, PageBuf::filled(4));
        let after = c.scopes().tracker(&s).expect("tracker").weight_of(PageKey(9));
        assert_eq!(after, before.map(|w| w + 1));

        assert!(c.on_load_attempt(Some(&s), PageKey(9), SwapKey::new(0, 2)).is_none());
        let stats = c.stats();
        assert_eq!((stats.load_hits, stats.load_misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn load_miss_does_not_admit() {
        let c = coordinator(8);
        let s = scope("/ui");
        c.begin_monitor(&s, 8);
        assert!(c.on_load_attempt(Some(&s), PageKey(3), SwapKey::new(0, 3)).is_none());
        assert!(!c.scopes().has(&s, PageKey(3)));
    }

    #[test]
    fn not_admitted_store_drops_stale_copy() {
        let c = coordinator(8);
        let s = scope("/ui");
        let key = SwapKey::new(0, 1);
        c.begin_monitor(&s, 1);
        c.on_page_charged(&s, PageKey(1));
        c.on_store_attempt(&s, PageKey(1), key, &[1_u8; PAGE_SIZE])
            .expect("sized");
        assert!(c.content().contains(key));

        // A different, untracked page reuses the slot.
        c.on_store_attempt(&s, PageKey(2), key, &[2_u8; PAGE_SIZE])
            .expect("sized");
        assert!(!c.content().contains(key));
    }

    #[test]
    fn full_store_declines_without_error() {
        let c = coordinator(1);
        let s = scope("/ui");
        c.begin_monitor(&s, 4);
        c.on_page_charged(&s, PageKey(1));
        c.on_page_charged(&s, PageKey(2));
        let data = [0_u8; PAGE_SIZE];
        assert!(
            c.on_store_attempt(&s, PageKey(1), SwapKey::new(0, 1), &data)
                .expect("sized")
                .is_cached()
        );
        assert_eq!(
            c.on_store_attempt(&s, PageKey(2), SwapKey::new(0, 2), &data)
                .expect("sized"),
            StorePath::Declined
        );
        assert_eq!(c.stats().store_declined, 1);
    }

    #[test]
    fn invalid_length_is_the_only_store_error() {
        let c = coordinator(1);
        let err = c
            .on_store_attempt(&scope("/ui"), PageKey(1), SwapKey::new(0, 1), &[0_u8; 3])
            .expect_err("short page");
        assert!(matches!(err, UicError::InvalidPageLength { got: 3, .. }));
    }

    #[test]
    fn invalidate_paths() {
        let c = coordinator(16);
        let s = scope("/ui");
        c.begin_monitor(&s, 16);
        for pfn in 0..4_u64 {
            c.on_page_charged(&s, PageKey(pfn));
            let area = u32::try_from(pfn % 2).expect("small");
            c.on_store_attempt(&s, PageKey(pfn), SwapKey::new(area, pfn), &[7_u8; PAGE_SIZE])
                .expect("sized");
        }
        assert!(c.on_invalidate(SwapKey::new(0, 0)));
        assert!(!c.on_invalidate(SwapKey::new(0, 0)));
        assert_eq!(c.on_invalidate_area(AreaId(1)), 2);
        assert_eq!(c.content().len(), 1);
        assert_eq!(c.stats().invalidations, 3);
    }

    #[test]
    fn apply_uses_default_capacity() {
        let c = Coordinator::new(CacheConfig {
            default_capacity: 7,
            ..CacheConfig::default()
        })
        .expect("coordinator");
        let outcome = c.apply_line("/uiapps/term").expect("parse");
        assert_eq!(outcome, ControlOutcome::Monitor(MonitorOutcome::Created));
        let tracker = c.scopes().tracker(&scope("/uiapps/term")).expect("tracker");
        assert_eq!(tracker.capacity(), 7);

        assert_eq!(
            c.apply_line("stop /uiapps/term").expect("parse"),
            ControlOutcome::Stopped { was_monitored: true }
        );
    }

    #[test]
    fn report_is_read_only() {
        let c = coordinator(8);
        let s = scope("/ui");
        c.begin_monitor(&s, 3);
        c.on_page_charged(&s, PageKey(0xA));
        c.on_page_charged(&s, PageKey(0xB));

        let first = c.report();
        let second = c.report();
        assert_eq!(first, second);
        assert_eq!(first.scopes.len(), 1);
        assert_eq!(first.scopes[0].entries, 2);
        assert_eq!(first.scopes[0].samples_seen, 2);
        assert!(first.render_text().starts_with("/ui Count:2 Stored:0 Record:2\n"));
    }

    #[test]
    fn teardown_empties_everything() {
        let c = coordinator(8);
        let s = scope("/ui");
        c.begin_monitor(&s, 3);
        c.on_page_charged(&s, PageKey(1));
        c.on_store_attempt(&s, PageKey(1), SwapKey::new(0, 1), &[0_u8; PAGE_SIZE])
            .expect("sized");
        c.teardown();
        assert!(c.scopes().is_empty());
        assert!(c.content().is_empty());
    }
}
