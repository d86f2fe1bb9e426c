//! Read-only inspection of the cache.

use serde::Serialize;
use std::fmt::Write as _;
use uic_freq::{FrequencyEntry, TrackerSnapshot};
use uic_types::ScopeId;

use crate::StatsSnapshot;

/// Entries printed per line by [`CacheReport::render_text`].
const ENTRIES_PER_LINE: usize = 5;

/// One scope's table as seen by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeReport {
    pub scope: ScopeId,
    pub capacity: u16,
    pub entries: usize,
    pub samples_seen: u16,
    pub min_weight: Option<u16>,
    pub max_weight: Option<u16>,
    /// Head (next eviction candidate) first.
    pub weights: Vec<FrequencyEntry>,
}

impl ScopeReport {
    #[must_use]
    pub fn from_snapshot(scope: ScopeId, snapshot: TrackerSnapshot) -> Self {
        Self {
            scope,
            capacity: snapshot.capacity,
            entries: snapshot.entries.len(),
            samples_seen: snapshot.samples_seen,
            min_weight: snapshot.min_weight(),
            max_weight: snapshot.max_weight(),
            weights: snapshot.entries,
        }
    }
}

/// Whole-cache dump. Building one never mutates the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub scopes: Vec<ScopeReport>,
    pub stored_pages: usize,
    pub max_entries: usize,
    pub stats: StatsSnapshot,
}

impl CacheReport {
    /// Render in the line format of the legacy inspection file:
    ///
    /// ```text
    /// /uiapps/term Count:3 Stored:12 Record:3
    ///
    /// 0xa: 10 0xb: 10 0xc: 11
    /// ```
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for scope in &self.scopes {
            let _ = writeln!(
                out,
                "{} Count:{} Stored:{} Record:{}",
                scope.scope, scope.entries, self.stored_pages, scope.samples_seen
            );
            for (pos, entry) in scope.weights.iter().enumerate() {
                if pos % ENTRIES_PER_LINE == 0 {
                    out.push('\n');
                }
                let _ = write!(out, "{:#x}: {} ", entry.key, entry.weight);
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uic_types::PageKey;

    fn entry(key: u64, weight: u16) -> FrequencyEntry {
        FrequencyEntry {
            key: PageKey(key),
            weight,
        }
    }

    #[test]
    fn text_layout_wraps_every_five_entries() {
        let snapshot = TrackerSnapshot {
            capacity: 8,
            samples_seen: 6,
            entries: (1..=6).map(|k| entry(k, 10)).collect(),
        };
        let report = CacheReport {
            scopes: vec![ScopeReport::from_snapshot(
                ScopeId::new("/a").expect("scope"),
                snapshot,
            )],
            stored_pages: 4,
            max_entries: 100,
            stats: StatsSnapshot::default(),
        };
        assert_eq!(
            report.render_text(),
            "/a Count:6 Stored:4 Record:6\n\n0x1: 10 0x2: 10 0x3: 10 0x4: 10 0x5: 10 \n0x6: 10 \n"
        );
    }

    #[test]
    fn empty_scope_renders_header_only() {
        let report = CacheReport {
            scopes: vec![ScopeReport::from_snapshot(
                ScopeId::new("/idle").expect("scope"),
                TrackerSnapshot {
                    capacity: 2,
                    samples_seen: 0,
                    entries: Vec::new(),
                },
            )],
            stored_pages: 0,
            max_entries: 1,
            stats: StatsSnapshot::default(),
        };
        let scope = &report.scopes[0];
        assert_eq!(scope.min_weight, None);
        assert_eq!(report.render_text(), "/idle Count:0 Stored:0 Record:0\n\n");
    }
}
