//! Admin control lines.
//!
//! Accepted forms:
//!
//! | Line | Meaning |
//! |------|---------|
//! | `<scope>` | arm `<scope>` with the configured default capacity |
//! | `monitor <scope>` | same |
//! | `monitor <scope> <capacity>` | arm with an explicit capacity |
//! | `stop <scope>` | stop monitoring `<scope>` |
//!
//! The bare form matches what the legacy write interface accepted: the whole
//! trimmed line is the scope id.

use uic_error::{Result, UicError};
use uic_freq::MonitorOutcome;
use uic_types::ScopeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Monitor {
        scope: ScopeId,
        capacity: Option<u16>,
    },
    Stop {
        scope: ScopeId,
    },
}

/// Effect of [`crate::Coordinator::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Monitor(MonitorOutcome),
    Stopped { was_monitored: bool },
}

fn parse_scope(raw: &str) -> Result<ScopeId> {
    ScopeId::new(raw).map_err(|err| UicError::InvalidScope(err.to_string()))
}

fn parse_capacity(raw: &str) -> Result<u16> {
    match raw.parse::<u16>() {
        Ok(0) => Err(UicError::InvalidCapacity("capacity must be > 0".to_owned())),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(UicError::InvalidCapacity(format!("{raw:?}: {err}"))),
    }
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(UicError::Parse("empty control line".to_owned()));
        }

        let mut words = line.split_whitespace();
        match words.next() {
            Some("monitor") => {
                let scope = words
                    .next()
                    .ok_or_else(|| UicError::Parse("monitor requires <scope>".to_owned()))?;
                let scope = parse_scope(scope)?;
                let capacity = words.next().map(parse_capacity).transpose()?;
                if let Some(extra) = words.next() {
                    return Err(UicError::Parse(format!("unexpected argument {extra:?}")));
                }
                Ok(Self::Monitor { scope, capacity })
            }
            Some("stop") => {
                let scope = words
                    .next()
                    .ok_or_else(|| UicError::Parse("stop requires <scope>".to_owned()))?;
                if let Some(extra) = words.next() {
                    return Err(UicError::Parse(format!("unexpected argument {extra:?}")));
                }
                Ok(Self::Stop {
                    scope: parse_scope(scope)?,
                })
            }
            _ => Ok(Self::Monitor {
                scope: parse_scope(line)?,
                capacity: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uic_types::MAX_SCOPE_ID_LEN;

    fn scope(name: &str) -> ScopeId {
        ScopeId::new(name).expect("scope")
    }

    #[test]
    fn bare_line_arms_with_default_capacity() {
        assert_eq!(
            ControlCommand::parse("/77@dde/uiapps/term\n").expect("parse"),
            ControlCommand::Monitor {
                scope: scope("/77@dde/uiapps/term"),
                capacity: None
            }
        );
    }

    #[test]
    fn explicit_forms() {
        assert_eq!(
            ControlCommand::parse("monitor /a 300").expect("parse"),
            ControlCommand::Monitor {
                scope: scope("/a"),
                capacity: Some(300)
            }
        );
        assert_eq!(
            ControlCommand::parse("  stop /a ").expect("parse"),
            ControlCommand::Stop { scope: scope("/a") }
        );
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(matches!(
            ControlCommand::parse("   "),
            Err(UicError::Parse(_))
        ));
        assert!(matches!(
            ControlCommand::parse("monitor"),
            Err(UicError::Parse(_))
        ));
        assert!(matches!(
            ControlCommand::parse("monitor /a 0"),
            Err(UicError::InvalidCapacity(_))
        ));
        assert!(matches!(
            ControlCommand::parse("monitor /a 70000"),
            Err(UicError::InvalidCapacity(_))
        ));
        assert!(matches!(
            ControlCommand::parse("stop /a /b"),
            Err(UicError::Parse(_))
        ));
        let long = "x".repeat(MAX_SCOPE_ID_LEN + 1);
        assert!(matches!(
            ControlCommand::parse(&long),
            Err(UicError::InvalidScope(_))
        ));
    }
}
