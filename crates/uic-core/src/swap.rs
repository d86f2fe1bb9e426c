//! Backing swap device and the cache wrapper in front of it.
//!
//! [`FrontCache`] plays the role a frontswap backend plays for the kernel:
//! pages whose store is accepted by the [`Coordinator`] never reach the
//! device, loads that hit never read it, and invalidations reach both.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;
use uic_error::{Result, UicError};
use uic_types::{AreaId, PAGE_SIZE, PageBuf, PageBufError, PageKey, ScopeId, SwapKey};

use crate::{Admission, Coordinator, StorePath};

/// Slot-addressed swap device.
pub trait SwapDevice: Send + Sync {
    /// Write one page to `key`. `data.len()` MUST equal `PAGE_SIZE`.
    fn write_page(&self, key: SwapKey, data: &[u8]) -> Result<()>;

    /// Read the page at `key`, or `None` if the slot was never written.
    fn read_page(&self, key: SwapKey) -> Result<Option<PageBuf>>;

    /// Forget the slot.
    fn discard(&self, key: SwapKey);

    /// Forget every slot of `area`.
    fn discard_area(&self, area: AreaId);
}

fn page_buf_error(err: PageBufError) -> UicError {
    match err {
        PageBufError::Length(e) => UicError::InvalidPageLength {
            got: e.got,
            expected: PAGE_SIZE,
        },
        PageBufError::Alloc(_) => UicError::OutOfMemory,
    }
}

/// Heap-backed swap device for tests and trace replay.
#[derive(Debug, Default)]
pub struct MemSwapDevice {
    pages: Mutex<HashMap<SwapKey, PageBuf>>,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl MemSwapDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages written through to this device.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Pages read back from this device.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

impl SwapDevice for MemSwapDevice {
    fn write_page(&self, key: SwapKey, data: &[u8]) -> Result<()> {
        let page = PageBuf::try_from_slice(data).map_err(page_buf_error)?;
        self.pages.lock().insert(key, page);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_page(&self, key: SwapKey) -> Result<Option<PageBuf>> {
        let page = self.pages.lock().get(&key).cloned();
        if page.is_some() {
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
        Ok(page)
    }

    fn discard(&self, key: SwapKey) {
        self.pages.lock().remove(&key);
    }

    fn discard_area(&self, area: AreaId) {
        self.pages.lock().retain(|key, _| key.area != area);
    }
}

/// Where a swapped-out page ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutTarget {
    Cache,
    Device,
}

/// Where a swapped-in page came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapInSource {
    Cache(PageBuf),
    Device(PageBuf),
    /// Neither the cache nor the device holds the slot.
    Missing,
}

impl SwapInSource {
    #[must_use]
    pub fn page(&self) -> Option<&PageBuf> {
        match self {
            Self::Cache(page) | Self::Device(page) => Some(page),
            Self::Missing => None,
        }
    }
}

/// Admission-gated cache in front of a [`SwapDevice`].
#[derive(Debug)]
pub struct FrontCache<D: SwapDevice> {
    inner: D,
    coordinator: Arc<Coordinator>,
}

impl<D: SwapDevice> FrontCache<D> {
    #[must_use]
    pub fn new(inner: D, coordinator: Arc<Coordinator>) -> Self {
        Self { inner, coordinator }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Swap `page` out to `key`. Pages without a scope always go to the device.
    pub fn swap_out(
        &self,
        scope: Option<&ScopeId>,
        page: PageKey,
        key: SwapKey,
        data: &[u8],
    ) -> Result<SwapOutTarget> {
        if let Some(scope) = scope {
            if let StorePath::Cached(_) = self.coordinator.on_store_attempt(scope, page, key, data)? {
                // The device copy, if any, is now older than the cached one.
                self.inner.discard(key);
                return Ok(SwapOutTarget::Cache);
            }
        } else {
            self.coordinator.on_invalidate(key);
        }
        self.inner.write_page(key, data)?;
        trace!(key = %key, "swap_out_device");
        Ok(SwapOutTarget::Device)
    }

    /// Swap slot `key` back in as `page`.
    pub fn swap_in(
        &self,
        scope: Option<&ScopeId>,
        page: PageKey,
        key: SwapKey,
    ) -> Result<SwapInSource> {
        if let Some(cached) = self.coordinator.on_load_attempt(scope, page, key) {
            return Ok(SwapInSource::Cache(cached));
        }
        Ok(self
            .inner
            .read_page(key)?
            .map_or(SwapInSource::Missing, SwapInSource::Device))
    }

    pub fn invalidate(&self, key: SwapKey) {
        self.coordinator.on_invalidate(key);
        self.inner.discard(key);
    }

    pub fn invalidate_area(&self, area: AreaId) {
        self.coordinator.on_invalidate_area(area);
        self.inner.discard_area(area);
    }

    pub fn charge(&self, scope: &ScopeId, page: PageKey) -> Admission {
        self.coordinator.on_page_charged(scope, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheConfig;

    fn front(max_entries: usize) -> FrontCache<MemSwapDevice> {
        let coordinator = Coordinator::new(CacheConfig {
            max_entries,
            shard_count: 2,
            ..CacheConfig::default()
        })
        .expect("coordinator");
        FrontCache::new(MemSwapDevice::new(), Arc::new(coordinator))
    }

    #[test]
    fn cached_pages_skip_the_device() {
        let fc = front(4);
        let s = ScopeId::new("/ui").expect("scope");
        fc.coordinator().begin_monitor(&s, 4);
        fc.charge(&s, PageKey(1));

        let key = SwapKey::new(0, 1);
        let target = fc
            .swap_out(Some(&s), PageKey(1), key, &[3_u8; PAGE_SIZE])
            .expect("swap out");
        assert_eq!(target, SwapOutTarget::Cache);
        assert_eq!(fc.inner().writes(), 0);

        let back = fc.swap_in(Some(&s), PageKey(1), key).expect("swap in");
        assert_eq!(back, SwapInSource::Cache(PageBuf::filled(3)));
        assert_eq!(fc.inner().reads(), 0);
    }

    #[test]
    fn cold_pages_fall_through() {
        let fc = front(4);
        let s = ScopeId::new("/ui").expect("scope");
        fc.coordinator().begin_monitor(&s, 4);

        let key = SwapKey::new(0, 2);
        let target = fc
            .swap_out(Some(&s), PageKey(2), key, &[5_u8; PAGE_SIZE])
            .expect("swap out");
        assert_eq!(target, SwapOutTarget::Device);
        let back = fc.swap_in(Some(&s), PageKey(2), key).expect("swap in");
        assert_eq!(back, SwapInSource::Device(PageBuf::filled(5)));
        assert_eq!(
            fc.swap_in(None, PageKey(3), SwapKey::new(0, 3)).expect("swap in"),
            SwapInSource::Missing
        );
    }

    #[test]
    fn rewrite_to_device_hides_older_cached_copy() {
        let fc = front(4);
        let s = ScopeId::new("/ui").expect("scope");
        fc.coordinator().begin_monitor(&s, 1);
        fc.charge(&s, PageKey(1));
        let key = SwapKey::new(0, 9);
        fc.swap_out(Some(&s), PageKey(1), key, &[1_u8; PAGE_SIZE])
            .expect("cached");

        fc.swap_out(None, PageKey(2), key, &[2_u8; PAGE_SIZE])
            .expect("device");
        let back = fc.swap_in(None, PageKey(2), key).expect("swap in");
        assert_eq!(back.page(), Some(&PageBuf::filled(2)));
    }

    #[test]
    fn invalidate_area_reaches_both_tiers() {
        let fc = front(4);
        let s = ScopeId::new("/ui").expect("scope");
        fc.coordinator().begin_monitor(&s, 4);
        fc.charge(&s, PageKey(1));
        fc.swap_out(Some(&s), PageKey(1), SwapKey::new(3, 0), &[1_u8; PAGE_SIZE])
            .expect("cached");
        fc.swap_out(None, PageKey(2), SwapKey::new(3, 1), &[2_u8; PAGE_SIZE])
            .expect("device");

        fc.invalidate_area(AreaId(3));
        assert!(fc.coordinator().content().is_empty());
        assert!(fc.inner().is_empty());
    }

    #[test]
    fn device_write_errors_keep_their_kind() {
        let dev = MemSwapDevice::new();
        let err = dev
            .write_page(SwapKey::new(0, 0), &[0_u8; 12])
            .expect_err("short page");
        assert!(matches!(err, UicError::InvalidPageLength { got: 12, .. }));
        assert!(dev.is_empty());

        let err = page_buf_error(PageBufError::Alloc(uic_types::AllocError));
        assert!(matches!(err, UicError::OutOfMemory));
        assert!(err.is_declined());
    }
}
