#![forbid(unsafe_code)]
//! uicache public API facade.
//!
//! Re-exports the coordinator, its components, and the shared key and error
//! types through one stable interface. This is the crate the CLI and any
//! embedding hook layer depend on.

pub use uic_core::*;
pub use uic_error::{Result, UicError};
pub use uic_types::{
    AreaId, DEFAULT_MAX_ENTRIES, DEFAULT_MONITOR_CAPACITY, INIT_WEIGHT, MAX_SCOPE_ID_LEN,
    PAGE_SIZE, PageBuf, PageKey, ScopeId, SwapKey,
};
