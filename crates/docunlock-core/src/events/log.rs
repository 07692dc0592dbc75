/// Event trail: in-memory entries, a JSONL file, or both
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::{trace_event, EngineEvent, EventKind, EventSink, Severity};

/// Records the events it receives and mirrors them to `tracing`.
///
/// A file-backed log appends each event as one JSON object per line and
/// flushes immediately, so the trail survives a crash mid-batch. It keeps
/// nothing in memory unless [`EventLog::retain_entries`] asks it to, which
/// keeps long batch runs flat in memory.
pub struct EventLog {
    entries: Mutex<Vec<EngineEvent>>,
    retain: bool,
    file: Option<Mutex<File>>,
    log_path: Option<PathBuf>,
}

impl EventLog {
    /// Memory-only log
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            retain: true,
            file: None,
            log_path: None,
        }
    }

    /// File-only log appending JSONL to `path`
    pub fn with_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            entries: Mutex::new(Vec::new()),
            retain: false,
            file: Some(Mutex::new(file)),
            log_path: Some(path),
        })
    }

    /// Also keep entries in memory for the query methods
    pub fn retain_entries(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// All retained entries, in arrival order. Always empty for a
    /// file-only log.
    pub fn entries(&self) -> Vec<EngineEvent> {
        self.entries.lock().clone()
    }

    pub fn entries_by_kind(&self, kind: EventKind) -> Vec<EngineEvent> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn entries_for_path(&self, path: &Path) -> Vec<EngineEvent> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.path == path)
            .cloned()
            .collect()
    }

    /// Export to a pretty-printed JSON array
    pub fn export_json(&self, output_path: impl AsRef<Path>) -> io::Result<()> {
        let entries = self.entries();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(output_path, json)
    }

    pub fn statistics(&self) -> EventStatistics {
        let entries = self.entries.lock();

        let mut kind_counts = HashMap::new();
        let mut severity_counts = HashMap::new();
        for entry in entries.iter() {
            *kind_counts.entry(entry.kind).or_insert(0) += 1;
            *severity_counts.entry(entry.severity).or_insert(0) += 1;
        }

        EventStatistics {
            total_entries: entries.len(),
            kind_counts,
            severity_counts,
            first_entry_time: entries.first().map(|e| e.timestamp),
            last_entry_time: entries.last().map(|e| e.timestamp),
        }
    }

    fn append_line(&self, event: &EngineEvent) -> io::Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let json = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = file.lock();
        writeln!(file, "{}", json)?;
        file.flush()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: EngineEvent) {
        trace_event(&event);
        if let Err(e) = self.append_line(&event) {
            tracing::warn!("failed to append to event log: {}", e);
        }
        if self.retain {
            self.entries.lock().push(event);
        }
    }
}

/// Event counts per kind and severity
#[derive(Debug, Clone, Serialize)]
pub struct EventStatistics {
    pub total_entries: usize,
    pub kind_counts: HashMap<EventKind, usize>,
    pub severity_counts: HashMap<Severity, usize>,
    pub first_entry_time: Option<DateTime<Utc>>,
    pub last_entry_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_log_records_events() {
        let log = EventLog::new();
        log.emit(EngineEvent::new(EventKind::FileDetected, "/a.pdf", "UNENCRYPTED"));
        log.emit(EngineEvent::new(EventKind::UnknownHeader, "/b.pdf", "00112233"));

        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries_by_kind(EventKind::UnknownHeader).len(), 1);
        assert_eq!(log.entries_for_path(Path::new("/a.pdf")).len(), 1);
        assert!(log.log_path().is_none());
    }

    #[test]
    fn test_file_log_writes_jsonl() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("events.jsonl");
        let log = EventLog::with_file(&path).unwrap();

        log.emit(EngineEvent::new(EventKind::RecoveryStarted, "/a.doc", "begin"));
        log.emit(EngineEvent::new(EventKind::FileRecovered, "/a.doc", "/a_decrypted.doc"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: EngineEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, EventKind::RecoveryStarted);
    }

    #[test]
    fn test_file_log_keeps_nothing_in_memory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let log = EventLog::with_file(&path).unwrap();

        for i in 0..100 {
            log.emit(EngineEvent::new(EventKind::FileDetected, format!("/{i}.pdf"), "UNENCRYPTED"));
        }

        assert!(log.entries().is_empty());
        assert_eq!(log.statistics().total_entries, 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 100);
    }

    #[test]
    fn test_file_log_can_retain_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let log = EventLog::with_file(&path).unwrap().retain_entries();

        log.emit(EngineEvent::new(EventKind::ScanStarted, "/docs", "1 input"));

        assert_eq!(log.entries().len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_statistics() {
        let log = EventLog::new();
        log.emit(EngineEvent::new(EventKind::FileDetected, "/1", "x"));
        log.emit(EngineEvent::new(EventKind::FileDetected, "/2", "x"));
        log.emit(EngineEvent::new(EventKind::DetectionFailed, "/3", "gone"));

        let stats = log.statistics();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.kind_counts.get(&EventKind::FileDetected), Some(&2));
        assert_eq!(stats.severity_counts.get(&Severity::Error), Some(&1));
        assert!(stats.first_entry_time.is_some());
    }

    #[test]
    fn test_export_json() {
        let temp_dir = TempDir::new().unwrap();
        let log = EventLog::new();
        log.emit(EngineEvent::new(EventKind::ScanStarted, "/docs", "2 inputs"));

        let json_path = temp_dir.path().join("events.json");
        log.export_json(&json_path).unwrap();
        let parsed: Vec<EngineEvent> =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
    }
}
