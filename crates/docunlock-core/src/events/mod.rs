//! Structured engine events
//!
//! Every detection and recovery attempt produces [`EngineEvent`]s. Where they
//! go is decided by the caller through an [`EventSink`]: the default
//! [`TracingSink`] forwards them to `tracing`, and [`EventLog`] keeps them in
//! memory for inspection or appends a JSONL trail for later review.

pub mod log;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use log::{EventLog, EventStatistics};

/// What happened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Batch scan started
    ScanStarted,
    /// Batch scan finished (possibly cancelled)
    ScanCompleted,
    /// File classified
    FileDetected,
    /// Recognized extension, but the header matched nothing
    UnknownHeader,
    /// File could not be inspected
    DetectionFailed,
    /// Recovery attempt began
    RecoveryStarted,
    /// Workspace copy created
    WorkspaceCreated,
    /// External program launched
    ProgramInvoked,
    /// External program killed after the deadline
    ProgramTimedOut,
    /// External program failed or left the file encrypted
    ProgramFailed,
    /// Recovered copy promoted to its final path
    FileRecovered,
    /// Recovery attempt ended without a result
    RecoveryFailed,
    /// Workspace removed
    WorkspaceCleaned,
    /// Workspace removal failed
    CleanupFailed,
    /// The original changed during a failed attempt
    OriginalModified,
    /// Batch or attempt cancelled by the caller
    Cancelled,
}

/// Severity levels for engine events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl EventKind {
    fn default_severity(self) -> Severity {
        match self {
            EventKind::WorkspaceCreated | EventKind::WorkspaceCleaned | EventKind::ProgramInvoked => {
                Severity::Debug
            }
            EventKind::UnknownHeader
            | EventKind::ProgramTimedOut
            | EventKind::ProgramFailed
            | EventKind::RecoveryFailed
            | EventKind::Cancelled => Severity::Warning,
            EventKind::DetectionFailed | EventKind::CleanupFailed | EventKind::OriginalModified => {
                Severity::Error
            }
            _ => Severity::Info,
        }
    }
}

/// One structured event: `{timestamp, path, kind, detail}` plus context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub path: PathBuf,
    pub detail: String,
    pub severity: Severity,

    /// Batch run this event belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Additional structured data
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl EngineEvent {
    pub fn new(kind: EventKind, path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
            severity: kind.default_severity(),
            run_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_run_id(mut self, run_id: Option<&str>) -> Self {
        self.run_id = run_id.map(str::to_string);
        self
    }
}

/// Destination for engine events. Implementations must tolerate concurrent
/// calls from worker threads and must never fail the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forwards events to `tracing` at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        trace_event(&event);
    }
}

pub(crate) fn trace_event(event: &EngineEvent) {
    let path = event.path.display();
    match event.severity {
        Severity::Debug => {
            tracing::debug!(kind = ?event.kind, run = ?event.run_id, "{}: {}", path, event.detail)
        }
        Severity::Info => {
            tracing::info!(kind = ?event.kind, run = ?event.run_id, "{}: {}", path, event.detail)
        }
        Severity::Warning => {
            tracing::warn!(kind = ?event.kind, run = ?event.run_id, "{}: {}", path, event.detail)
        }
        Severity::Error => {
            tracing::error!(kind = ?event.kind, run = ?event.run_id, "{}: {}", path, event.detail)
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: EngineEvent) {
        (**self).emit(event)
    }
}

/// Shared handle used by the engine components
pub type SharedSink = Arc<dyn EventSink>;

pub fn tracing_sink() -> SharedSink {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severity() {
        let ev = EngineEvent::new(EventKind::FileDetected, "/a.pdf", "ENCRYPTED");
        assert_eq!(ev.severity, Severity::Info);

        let ev = EngineEvent::new(EventKind::UnknownHeader, "/a.pdf", "deadbeef");
        assert_eq!(ev.severity, Severity::Warning);

        let ev = EngineEvent::new(EventKind::OriginalModified, "/a.pdf", "digest changed");
        assert_eq!(ev.severity, Severity::Error);
    }

    #[test]
    fn test_event_serializes_kind_and_skips_empty_fields() {
        let ev = EngineEvent::new(EventKind::RecoveryFailed, "/docs/b.pdf", "timeout")
            .with_run_id(None);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"kind\":\"RECOVERY_FAILED\""));
        assert!(json.contains("\"severity\":\"WARNING\""));
        assert!(!json.contains("run_id"));
        assert!(!json.contains("metadata"));

        let ev = ev.with_metadata("program", "/usr/bin/wps").with_run_id(Some("r1"));
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"run_id\":\"r1\""));
        assert!(json.contains("/usr/bin/wps"));
    }
}
