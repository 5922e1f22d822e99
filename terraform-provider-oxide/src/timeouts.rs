//! Per-operation timeouts
//!
//! Every resource carries a `timeouts` attribute with optional `create`,
//! `read`, `update` and `delete` durations (`"30s"`, `"10m"`, `"1h30m"`).
//! Operations turn the relevant one into a [`Deadline`] that bounds every
//! control-plane call they make.

use crate::client::{self, ClientError};
use crate::schema::{Diagnostic, NestingMode, SchemaAttribute, SchemaBlock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Applied when a timeout is not configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Longest accepted timeout; keeps `Instant` arithmetic from overflowing
pub const MAX_TIMEOUT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Lifecycle phase a timeout applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    Read,
    Update,
    Delete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Create => "create",
            Phase::Read => "read",
            Phase::Update => "update",
            Phase::Delete => "delete",
        }
    }
}

/// The `timeouts` attribute value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub create: Option<String>,
    pub read: Option<String>,
    pub update: Option<String>,
    pub delete: Option<String>,
}

impl Timeouts {
    /// Configured duration for `phase`, or [`DEFAULT_TIMEOUT`]
    pub fn get(&self, phase: Phase) -> Result<Duration, Diagnostic> {
        let configured = match phase {
            Phase::Create => &self.create,
            Phase::Read => &self.read,
            Phase::Update => &self.update,
            Phase::Delete => &self.delete,
        };

        let invalid = |detail: String| {
            Diagnostic::error("Invalid timeout")
                .with_detail(&detail)
                .with_attribute(vec!["timeouts".to_string(), phase.as_str().to_string()])
        };

        let raw = match configured.as_deref() {
            None | Some("") => return Ok(DEFAULT_TIMEOUT),
            Some(raw) => raw,
        };
        let timeout = humantime::parse_duration(raw)
            .map_err(|e| invalid(format!("{} timeout {:?}: {}", phase.as_str(), raw, e)))?;
        if timeout > MAX_TIMEOUT {
            return Err(invalid(format!(
                "{} timeout {:?} is too large, the maximum is {}",
                phase.as_str(),
                raw,
                humantime::format_duration(MAX_TIMEOUT)
            )));
        }
        Ok(timeout)
    }

    /// Deadline for `operation` starting now
    pub fn deadline(
        timeouts: Option<&Timeouts>,
        phase: Phase,
        operation: &str,
    ) -> Result<Deadline, Diagnostic> {
        let timeout = match timeouts {
            Some(t) => t.get(phase)?,
            None => DEFAULT_TIMEOUT,
        };
        Ok(Deadline::new(operation, timeout))
    }
}

/// Schema for a `timeouts` attribute accepting the given phases
pub fn timeouts_attribute(phases: &[Phase]) -> SchemaAttribute {
    let block = phases.iter().fold(SchemaBlock::new(), |block, phase| {
        block.with_attribute(
            phase.as_str(),
            SchemaAttribute::string()
                .with_description(&format!(
                    "Time allowed for {} operations, e.g. \"30s\" or \"2h45m\"",
                    phase.as_str()
                ))
                .optional(),
        )
    });
    SchemaAttribute::nested(NestingMode::Single, block).optional()
}

/// Wall-clock limit for one provider operation
#[derive(Debug, Clone)]
pub struct Deadline {
    operation: String,
    timeout: Duration,
    at: Instant,
}

impl Deadline {
    pub fn new(operation: &str, timeout: Duration) -> Self {
        Self {
            operation: operation.to_string(),
            timeout,
            at: Instant::now() + timeout.min(MAX_TIMEOUT),
        }
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Run a control-plane call, abandoning it when the deadline passes
    pub async fn run<T, F>(&self, call: F) -> client::Result<T>
    where
        F: Future<Output = client::Result<T>>,
    {
        match tokio::time::timeout_at(self.at, call).await {
            Ok(result) => result,
            Err(_) => Err(self.exceeded()),
        }
    }

    pub fn exceeded(&self) -> ClientError {
        ClientError::DeadlineExceeded {
            operation: self.operation.clone(),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.get(Phase::Create).unwrap(), DEFAULT_TIMEOUT);
        assert_eq!(timeouts.get(Phase::Delete).unwrap(), Duration::from_secs(600));
    }

    #[test]
    fn test_parses_configured_values() {
        let timeouts = Timeouts {
            create: Some("30s".into()),
            read: Some("1h30m".into()),
            update: Some("500ms".into()),
            delete: Some("2m".into()),
        };
        assert_eq!(timeouts.get(Phase::Create).unwrap(), Duration::from_secs(30));
        assert_eq!(timeouts.get(Phase::Read).unwrap(), Duration::from_secs(5400));
        assert_eq!(timeouts.get(Phase::Update).unwrap(), Duration::from_millis(500));
        assert_eq!(timeouts.get(Phase::Delete).unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_value_points_at_attribute() {
        let timeouts = Timeouts {
            delete: Some("soon".into()),
            ..Default::default()
        };
        let diag = timeouts.get(Phase::Delete).unwrap_err();
        assert!(diag.is_error());
        assert_eq!(
            diag.attribute,
            Some(vec!["timeouts".to_string(), "delete".to_string()])
        );
    }

    #[test]
    fn test_huge_timeout_is_rejected() {
        let timeouts = Timeouts {
            create: Some("500000000000y".into()),
            ..Default::default()
        };
        let diag = Timeouts::deadline(Some(&timeouts), Phase::Create, "create instance").unwrap_err();
        assert_eq!(diag.summary, "Invalid timeout");
        assert!(diag.detail.unwrap().contains("too large"));
        assert_eq!(
            diag.attribute,
            Some(vec!["timeouts".to_string(), "create".to_string()])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_clamps_oversized_timeout() {
        let deadline = Deadline::new("x", Duration::from_secs(u64::MAX / 2));
        assert!(deadline.remaining() <= MAX_TIMEOUT);
        assert!(deadline.remaining() > Duration::from_secs(60));
    }

    #[test]
    fn test_schema_lists_requested_phases() {
        let attr = timeouts_attribute(&[Phase::Read]);
        let nested = attr.nested.unwrap();
        assert!(nested.block.attributes.contains_key("read"));
        assert!(!nested.block.attributes.contains_key("create"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_off_slow_call() {
        let deadline = Deadline::new("delete instance", Duration::from_secs(5));
        let result: client::Result<()> = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        match result {
            Err(ClientError::DeadlineExceeded { operation, timeout }) => {
                assert_eq!(operation, "delete instance");
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("expected deadline error, got {:?}", other),
        }
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
