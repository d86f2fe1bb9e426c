#![forbid(unsafe_code)]
//! Value types shared across the uicache crates.
//!
//! Everything here is plain data: identifiers for pages, swap slots and
//! monitoring scopes, plus the owned page buffer that travels between the
//! content store and its callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of one cached page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Weight given to a key the first time it enters a frequency table.
pub const INIT_WEIGHT: u16 = 10;

/// Longest accepted scope identifier, in bytes.
pub const MAX_SCOPE_ID_LEN: usize = 128;

/// Table capacity used when a scope is armed without an explicit capacity.
pub const DEFAULT_MONITOR_CAPACITY: u16 = 2500;

/// Memory the content store may spend on page payloads by default.
pub const DEFAULT_BUDGET_BYTES: usize = 100 * 1024 * 1024;

/// Default content store budget expressed in page slots.
pub const DEFAULT_MAX_ENTRIES: usize = DEFAULT_BUDGET_BYTES / PAGE_SIZE;

/// In-memory identity of a page (its frame number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageKey(pub u64);

impl fmt::LowerHex for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Backing swap area number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AreaId(pub u32);

/// Device-level identity of a page: which swap area and which slot in it.
///
/// Independent of the frame number the page occupies while resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SwapKey {
    pub area: AreaId,
    pub offset: u64,
}

impl SwapKey {
    #[must_use]
    pub const fn new(area: u32, offset: u64) -> Self {
        Self {
            area: AreaId(area),
            offset,
        }
    }
}

impl fmt::Display for SwapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.area.0, self.offset)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeIdError {
    #[error("scope id is empty")]
    Empty,
    #[error("scope id is {len} bytes, limit is {MAX_SCOPE_ID_LEN}")]
    TooLong { len: usize },
    #[error("scope id contains a NUL byte")]
    InteriorNul,
}

/// Name of an independent monitoring domain, e.g. a memory cgroup path.
///
/// Invariant: non-empty, at most [`MAX_SCOPE_ID_LEN`] bytes, no NUL bytes,
/// no leading or trailing whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeId(String);

impl ScopeId {
    /// Validate and wrap a scope identifier. Surrounding whitespace is trimmed.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ScopeIdError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ScopeIdError::Empty);
        }
        if trimmed.len() > MAX_SCOPE_ID_LEN {
            return Err(ScopeIdError::TooLong { len: trimmed.len() });
        }
        if trimmed.contains('\0') {
            return Err(ScopeIdError::InteriorNul);
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ScopeId {
    type Error = ScopeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ScopeId {
    type Error = ScopeIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScopeId> for String {
    fn from(value: ScopeId) -> Self {
        value.0
    }
}

/// The allocator refused a request. Callers treat this as a normal outcome.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("allocation failed")]
pub struct AllocError;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("page payload is {got} bytes, expected {PAGE_SIZE}")]
pub struct PageLengthError {
    pub got: usize,
}

/// Owned, fixed-length page payload.
///
/// Invariant: always exactly [`PAGE_SIZE`] bytes. There is no resizing.
#[derive(Clone, PartialEq, Eq)]
pub struct PageBuf {
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl PageBuf {
    /// Allocate a zeroed page, reporting allocator refusal instead of aborting.
    pub fn try_zeroed() -> Result<Self, AllocError> {
        let mut raw = Vec::new();
        raw.try_reserve_exact(PAGE_SIZE).map_err(|_| AllocError)?;
        raw.resize(PAGE_SIZE, 0);
        let bytes: Box<[u8; PAGE_SIZE]> = raw
            .into_boxed_slice()
            .try_into()
            .map_err(|_| AllocError)?;
        Ok(Self { bytes })
    }

    /// Allocate a page and copy `data` into it.
    ///
    /// Length is checked before any allocation happens.
    pub fn try_from_slice(data: &[u8]) -> Result<Self, PageBufError> {
        if data.len() != PAGE_SIZE {
            return Err(PageBufError::Length(PageLengthError { got: data.len() }));
        }
        let mut page = Self::try_zeroed()?;
        page.bytes.copy_from_slice(data);
        Ok(page)
    }

    /// A page with every byte set to `byte`. Aborts on allocation failure;
    /// meant for tests and trace replay, not for the hot paths.
    #[must_use]
    pub fn filled(byte: u8) -> Self {
        Self {
            bytes: Box::new([byte; PAGE_SIZE]),
        }
    }

    /// Overwrite this page in place with `src`.
    pub fn copy_from(&mut self, src: &[u8; PAGE_SIZE]) {
        self.bytes.copy_from_slice(src);
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    #[must_use]
    pub fn as_array(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuf")
            .field("first", &self.bytes[0])
            .field("len", &PAGE_SIZE)
            .finish()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PageBufError {
    #[error(transparent)]
    Length(#[from] PageLengthError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_id_trims_and_validates() {
        let id = ScopeId::new("  /uiapps/editor\n").expect("valid");
        assert_eq!(id.as_str(), "/uiapps/editor");
        assert_eq!(ScopeId::new("   "), Err(ScopeIdError::Empty));
        assert_eq!(ScopeId::new("a\0b"), Err(ScopeIdError::InteriorNul));

        let at_limit = "x".repeat(MAX_SCOPE_ID_LEN);
        assert!(ScopeId::new(&at_limit).is_ok());
        let over = "x".repeat(MAX_SCOPE_ID_LEN + 1);
        assert_eq!(
            ScopeId::new(&over),
            Err(ScopeIdError::TooLong {
                len: MAX_SCOPE_ID_LEN + 1
            })
        );
    }

    #[test]
    fn scope_id_deserialization_rejects_invalid() {
        let ok: ScopeId = serde_json::from_str("\"/a/b\"").expect("valid scope");
        assert_eq!(ok.to_string(), "/a/b");
        assert!(serde_json::from_str::<ScopeId>("\"\"").is_err());
    }

    #[test]
    fn page_buf_checks_length_before_copy() {
        let short = [1_u8; 100];
        assert_eq!(
            PageBuf::try_from_slice(&short),
            Err(PageBufError::Length(PageLengthError { got: 100 }))
        );

        let full = [9_u8; PAGE_SIZE];
        let page = PageBuf::try_from_slice(&full).expect("page");
        assert_eq!(page.as_slice(), &full[..]);
    }

    #[test]
    fn page_buf_copy_from_overwrites_every_byte() {
        let mut page = PageBuf::try_zeroed().expect("page");
        assert!(page.as_slice().iter().all(|b| *b == 0));
        page.copy_from(&[0xAB; PAGE_SIZE]);
        assert_eq!(page, PageBuf::filled(0xAB));
    }

    #[test]
    fn default_budget_is_100_mib_of_pages() {
        assert_eq!(DEFAULT_MAX_ENTRIES, 25_600);
    }

    #[test]
    fn swap_key_display() {
        assert_eq!(SwapKey::new(1, 100).to_string(), "1:100");
    }
}
