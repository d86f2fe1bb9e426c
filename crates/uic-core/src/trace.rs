//! Page-event traces and their replay.
//!
//! A trace is plain text, one event per line. Numbers are decimal or
//! `0x`-prefixed hex. Blank lines and `#` comments are skipped.
//!
//! ```text
//! monitor <scope> [capacity]
//! stop <scope>
//! charge <scope> <pfn>
//! store <scope> <area> <offset> <pfn> <fill-byte>
//! load <scope> <area> <offset> <pfn>
//! invalidate <area> <offset>
//! invalidate-area <area>
//! ```
//!
//! `store` writes a page whose bytes are all `<fill-byte>`. Replay keeps a
//! model of what each slot should contain and counts loads that disagree.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use uic_error::{Result, UicError};
use uic_types::{AreaId, PAGE_SIZE, PageKey, ScopeId, SwapKey};

use crate::{ControlCommand, FrontCache, SwapDevice, SwapInSource, SwapOutTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Control(ControlCommand),
    Charge {
        scope: ScopeId,
        page: PageKey,
    },
    Store {
        scope: ScopeId,
        key: SwapKey,
        page: PageKey,
        fill: u8,
    },
    Load {
        scope: ScopeId,
        key: SwapKey,
        page: PageKey,
    },
    Invalidate {
        key: SwapKey,
    },
    InvalidateArea {
        area: AreaId,
    },
}

fn parse_u64(raw: &str) -> Result<u64> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    };
    parsed.map_err(|err| UicError::Parse(format!("{raw:?}: {err}")))
}

fn parse_narrow<T: TryFrom<u64>>(raw: &str, what: &str) -> Result<T> {
    let wide = parse_u64(raw)?;
    T::try_from(wide).map_err(|_| UicError::Parse(format!("{what} out of range: {raw}")))
}

fn scope_arg(raw: &str) -> Result<ScopeId> {
    ScopeId::new(raw).map_err(|err| UicError::InvalidScope(err.to_string()))
}

/// Parse one trace line. `Ok(None)` for blanks and comments.
pub fn parse_line(line: &str) -> Result<Option<TraceEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    let event = match words.as_slice() {
        ["monitor" | "stop", ..] => TraceEvent::Control(ControlCommand::parse(line)?),
        ["charge", scope, pfn] => TraceEvent::Charge {
            scope: scope_arg(scope)?,
            page: PageKey(parse_u64(pfn)?),
        },
        ["store", scope, area, offset, pfn, fill] => TraceEvent::Store {
            scope: scope_arg(scope)?,
            key: SwapKey::new(parse_narrow(area, "area")?, parse_u64(offset)?),
            page: PageKey(parse_u64(pfn)?),
            fill: parse_narrow(fill, "fill byte")?,
        },
        ["load", scope, area, offset, pfn] => TraceEvent::Load {
            scope: scope_arg(scope)?,
            key: SwapKey::new(parse_narrow(area, "area")?, parse_u64(offset)?),
            page: PageKey(parse_u64(pfn)?),
        },
        ["invalidate", area, offset] => TraceEvent::Invalidate {
            key: SwapKey::new(parse_narrow(area, "area")?, parse_u64(offset)?),
        },
        ["invalidate-area", area] => TraceEvent::InvalidateArea {
            area: AreaId(parse_narrow(area, "area")?),
        },
        [verb, ..] => {
            return Err(UicError::Parse(format!("unknown or malformed event {verb:?}")));
        }
        [] => return Ok(None),
    };
    Ok(Some(event))
}

/// Parse a whole trace. Errors carry the 1-based line number.
pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(err) => {
                return Err(UicError::Parse(format!("line {}: {err}", idx + 1)));
            }
        }
    }
    Ok(events)
}

/// Totals from one [`replay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events: u64,
    pub stores_cached: u64,
    pub stores_to_device: u64,
    pub loads_from_cache: u64,
    pub loads_from_device: u64,
    pub loads_missing: u64,
    /// Loads whose bytes differed from the last page written to the slot.
    pub mismatches: u64,
}

/// Drive `events` through `front` and tally where pages went.
pub fn replay<D: SwapDevice>(
    front: &FrontCache<D>,
    events: &[TraceEvent],
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    let mut expected: HashMap<SwapKey, u8> = HashMap::new();

    for event in events {
        summary.events += 1;
        match event {
            TraceEvent::Control(command) => {
                let outcome = front.coordinator().apply(command);
                debug!(?command, ?outcome, "replay_control");
            }
            TraceEvent::Charge { scope, page } => {
                front.charge(scope, *page);
            }
            TraceEvent::Store {
                scope,
                key,
                page,
                fill,
            } => {
                let data = [*fill; PAGE_SIZE];
                match front.swap_out(Some(scope), *page, *key, &data)? {
                    SwapOutTarget::Cache => summary.stores_cached += 1,
                    SwapOutTarget::Device => summary.stores_to_device += 1,
                }
                expected.insert(*key, *fill);
            }
            TraceEvent::Load { scope, key, page } => {
                let source = front.swap_in(Some(scope), *page, *key)?;
                match &source {
                    SwapInSource::Cache(_) => summary.loads_from_cache += 1,
                    SwapInSource::Device(_) => summary.loads_from_device += 1,
                    SwapInSource::Missing => summary.loads_missing += 1,
                }
                if let (Some(page), Some(fill)) = (source.page(), expected.get(key)) {
                    if page.as_slice().iter().any(|b| b != fill) {
                        warn!(key = %key, "replay_mismatch");
                        summary.mismatches += 1;
                    }
                }
            }
            TraceEvent::Invalidate { key } => {
                front.invalidate(*key);
                expected.remove(key);
            }
            TraceEvent::InvalidateArea { area } => {
                front.invalidate_area(*area);
                expected.retain(|key, _| key.area != *area);
            }
        }
    }
    Ok(summary)
}
