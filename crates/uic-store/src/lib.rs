#![forbid(unsafe_code)]
//! Bounded page store keyed by swap slot.
//!
//! [`ContentStore`] holds raw page bytes for admitted swap slots. The index
//! is split into shards, each behind its own spin lock, and the page budget
//! is a single atomic counter shared by all shards. A slot is reserved on
//! the counter before a new entry is allocated, so the budget can never be
//! overshot by concurrent writers.
//!
//! The store never evicts on its own. When the budget is spent, new keys are
//! refused with [`UicError::OutOfSpace`]; deciding which pages deserve a
//! slot is the admission table's job, not this one's.

use spin::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, trace, warn};
use uic_error::{Result, UicError};
use uic_types::{AreaId, PAGE_SIZE, PageBuf, SwapKey};

/// What [`ContentStore::store`] did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// The key was already present; bytes were replaced in place.
    Overwritten,
}

#[derive(Debug, Default)]
struct Shard {
    pages: HashMap<SwapKey, PageBuf>,
}

/// Route a swap slot to a shard.
///
/// Adjacent offsets in one area spread across shards; the area number is
/// folded into the high half so equal offsets in different areas do too.
#[inline]
fn shard_for(key: SwapKey, shard_count: usize) -> usize {
    let mixed = (u64::from(key.area.0).rotate_left(32) ^ key.offset)
        .wrapping_mul(0x517c_c1b7_2722_0a95);
    let folded = mixed ^ (mixed >> 32);
    let count = u64::try_from(shard_count).unwrap_or(1).max(1);
    usize::try_from(folded % count).unwrap_or(0)
}

/// Global key → page store with a fixed page budget.
#[derive(Debug)]
pub struct ContentStore {
    shards: Vec<Mutex<Shard>>,
    max_entries: usize,
    stored: AtomicUsize,
}

impl ContentStore {
    /// Create a store that holds at most `max_entries` pages across
    /// `shard_count` index shards (at least one).
    #[must_use]
    pub fn new(max_entries: usize, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        info!(max_entries, shard_count, "content_store: initializing");
        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(Shard::default()))
                .collect(),
            max_entries,
            stored: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Pages currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stored.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: SwapKey) -> &Mutex<Shard> {
        &self.shards[shard_for(key, self.shards.len())]
    }

    /// Claim one page slot, or report the budget as spent.
    fn reserve_slot(&self) -> Result<()> {
        self.stored
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_entries).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| UicError::OutOfSpace {
                limit: self.max_entries,
            })
    }

    fn release_slots(&self, n: usize) {
        if n > 0 {
            self.stored.fetch_sub(n, Ordering::AcqRel);
        }
    }

    /// Copy `data` into the store under `key`.
    ///
    /// An existing key is overwritten in place and never consumes budget. A
    /// new key needs a free slot (`OutOfSpace` otherwise) and a successful
    /// allocation (`OutOfMemory` otherwise). A failed call leaves the store
    /// exactly as it was.
    pub fn store(&self, key: SwapKey, data: &[u8]) -> Result<StoreOutcome> {
        let data: &[u8; PAGE_SIZE] = data.try_into().map_err(|_| UicError::InvalidPageLength {
            got: data.len(),
            expected: PAGE_SIZE,
        })?;

        let mut shard = self.shard(key).lock();
        if let Some(page) = shard.pages.get_mut(&key) {
            page.copy_from(data);
            drop(shard);
            trace!(key = %key, "content_overwrite");
            return Ok(StoreOutcome::Overwritten);
        }

        if let Err(err) = self.reserve_slot() {
            drop(shard);
            debug!(key = %key, limit = self.max_entries, "content_store_full");
            return Err(err);
        }

        let page = PageBuf::try_zeroed().and_then(|mut page| {
            shard.pages.try_reserve(1).map_err(|_| uic_types::AllocError)?;
            page.copy_from(data);
            Ok(page)
        });
        match page {
            Ok(page) => {
                shard.pages.insert(key, page);
                drop(shard);
                trace!(key = %key, "content_insert");
                Ok(StoreOutcome::Inserted)
            }
            Err(_) => {
                self.release_slots(1);
                drop(shard);
                warn!(key = %key, "content_alloc_failed");
                Err(UicError::OutOfMemory)
            }
        }
    }

    /// Copy of the page stored under `key`, if any.
    ///
    /// A failed allocation for the copy is reported as a miss.
    #[must_use]
    pub fn load(&self, key: SwapKey) -> Option<PageBuf> {
        let mut out = match PageBuf::try_zeroed() {
            Ok(page) => page,
            Err(_) => {
                warn!(key = %key, "content_load_alloc_failed");
                return None;
            }
        };
        let shard = self.shard(key).lock();
        let page = shard.pages.get(&key)?;
        out.copy_from(page.as_array());
        drop(shard);
        Some(out)
    }

    /// Copy the page stored under `key` into `dst`. Returns whether it hit.
    ///
    /// Allocation-free; suited to callers that already own the destination.
    pub fn load_into(&self, key: SwapKey, dst: &mut [u8]) -> Result<bool> {
        let got = dst.len();
        let dst: &mut [u8; PAGE_SIZE] = dst.try_into().map_err(|_| UicError::InvalidPageLength {
            got,
            expected: PAGE_SIZE,
        })?;
        let shard = self.shard(key).lock();
        let Some(page) = shard.pages.get(&key) else {
            return Ok(false);
        };
        dst.copy_from_slice(page.as_slice());
        drop(shard);
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, key: SwapKey) -> bool {
        self.shard(key).lock().pages.contains_key(&key)
    }

    /// Remove `key`. Returns whether anything was removed.
    pub fn delete(&self, key: SwapKey) -> bool {
        let mut shard = self.shard(key).lock();
        let removed = shard.pages.remove(&key).is_some();
        if removed {
            // Release before unlocking so the count never trails the shards.
            self.release_slots(1);
        }
        drop(shard);
        if removed {
            trace!(key = %key, "content_delete");
        }
        removed
    }

    /// Remove every entry whose key satisfies `pred`. Returns the count.
    ///
    /// Shards are visited one at a time; entries added concurrently to an
    /// already-visited shard are not removed.
    pub fn delete_all(&self, pred: impl Fn(&SwapKey) -> bool) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.pages.len();
            shard.pages.retain(|key, _| !pred(key));
            let n = before - shard.pages.len();
            self.release_slots(n);
            drop(shard);
            removed += n;
        }
        removed
    }

    /// Remove every page that belongs to swap area `area`.
    pub fn delete_area(&self, area: AreaId) -> usize {
        let removed = self.delete_all(|key| key.area == area);
        debug!(area = area.0, removed, "content_delete_area");
        removed
    }

    /// Remove everything.
    pub fn clear(&self) -> usize {
        self.delete_all(|_| true)
    }
}
