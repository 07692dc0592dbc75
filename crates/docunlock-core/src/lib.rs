use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod cancel;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod integrity;
pub mod recovery;
pub mod scan;

pub use cancel::CancellationToken;
pub use config::{EngineConfig, OutputMode, Settings};
pub use detection::{EncryptionDetector, Signature, SignatureKind, SignatureRegistry};
pub use error::{
    ConfigError, DuplicateSignatureError, ExternalProgramError, PathError, RecoveryError,
    UnrecognizedFormatError, WorkspaceError,
};
pub use events::{EngineEvent, EventKind, EventLog, EventSink, SharedSink, TracingSink};
pub use recovery::{ExternalProgram, RecoveryEngine, RecoverySettings, TempWorkspace};
pub use scan::{BatchScanner, ScanProgress};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DetectionStatus {
    Encrypted,
    Unencrypted,
    Unrecognized,
    Error,
}

impl std::fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionStatus::Encrypted => write!(f, "ENCRYPTED"),
            DetectionStatus::Unencrypted => write!(f, "UNENCRYPTED"),
            DetectionStatus::Unrecognized => write!(f, "UNRECOGNIZED"),
            DetectionStatus::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub path: PathBuf,
    pub status: DetectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_label: Option<String>,
    /// Cause of an ERROR
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Why the file was left UNRECOGNIZED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DetectionResult {
    pub fn matched(path: &Path, status: DetectionStatus, label: String) -> Self {
        Self {
            path: path.to_path_buf(),
            status,
            matched_label: Some(label),
            error_detail: None,
            note: None,
        }
    }

    pub fn unrecognized(path: &Path, reason: String) -> Self {
        Self {
            path: path.to_path_buf(),
            status: DetectionStatus::Unrecognized,
            matched_label: None,
            error_detail: None,
            note: Some(reason),
        }
    }

    pub fn error(path: &Path, detail: String) -> Self {
        Self {
            path: path.to_path_buf(),
            status: DetectionStatus::Error,
            matched_label: None,
            error_detail: Some(detail),
            note: None,
        }
    }
}

/// Results of one batch scan, in discovery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub results: Vec<DetectionResult>,
    /// Set when the batch stopped before every file was visited
    pub cancelled: bool,
}

impl BatchReport {
    pub fn count(&self, status: DetectionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn encrypted(&self) -> impl Iterator<Item = &DetectionResult> {
        self.results
            .iter()
            .filter(|r| r.status == DetectionStatus::Encrypted)
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            total: self.results.len(),
            encrypted: self.count(DetectionStatus::Encrypted),
            unencrypted: self.count(DetectionStatus::Unencrypted),
            unrecognized: self.count(DetectionStatus::Unrecognized),
            errors: self.count(DetectionStatus::Error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total: usize,
    pub encrypted: usize,
    pub unencrypted: usize,
    pub unrecognized: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "UPPERCASE")]
pub enum Outcome {
    /// Path of the decrypted file
    Recovered(PathBuf),
    Unchanged,
    /// Human-readable reason
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub path: PathBuf,
    pub outcome: Outcome,
}

impl RecoveryOutcome {
    pub fn recovered(path: &Path, new_path: PathBuf) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome: Outcome::Recovered(new_path),
        }
    }

    pub fn unchanged(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome: Outcome::Unchanged,
        }
    }

    pub fn failed(path: &Path, reason: String) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome: Outcome::Failed(reason),
        }
    }

    pub fn recovered_path(&self) -> Option<&Path> {
        match &self.outcome {
            Outcome::Recovered(p) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// One file of a detect-then-recover batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockEntry {
    pub detection: DetectionResult,
    /// Present only for files detected ENCRYPTED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockReport {
    pub run_id: String,
    pub entries: Vec<UnlockEntry>,
    pub cancelled: bool,
}

impl UnlockReport {
    pub fn recoveries(&self) -> impl Iterator<Item = &RecoveryOutcome> {
        self.entries.iter().filter_map(|e| e.recovery.as_ref())
    }

    pub fn recovered_count(&self) -> usize {
        self.recoveries()
            .filter(|r| matches!(r.outcome, Outcome::Recovered(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.recoveries().filter(|r| r.is_failed()).count()
    }
}

/// Detector, scanner and recovery engine wired from one [`EngineConfig`],
/// sharing a registry, an event sink and a cancellation token.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<SignatureRegistry>,
    detector: EncryptionDetector,
    scanner: BatchScanner,
    recovery: RecoveryEngine,
    cancel: CancellationToken,
}

impl Engine {
    /// Fails on any configuration problem (bad header hex, conflicting
    /// labels, zero threads) before a single file is touched.
    pub fn from_config(config: EngineConfig, sink: SharedSink) -> Result<Self, ConfigError> {
        if config.settings.max_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        let registry = Arc::new(config.build_registry()?);
        let detector = EncryptionDetector::with_sink(registry.clone(), sink);
        let cancel = CancellationToken::new();

        let scanner = BatchScanner::new(detector.clone(), config.settings.max_threads)?
            .with_cancellation(cancel.clone());
        let recovery = RecoveryEngine::new(
            detector.clone(),
            RecoverySettings::from_settings(&config.settings),
        )
        .with_cancellation(cancel.clone());

        tracing::debug!(
            "engine ready: {} signatures, {} extensions, {} threads",
            registry.signature_count(),
            registry.extensions().len(),
            config.settings.max_threads
        );

        Ok(Self {
            config,
            registry,
            detector,
            scanner,
            recovery,
            cancel,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SignatureRegistry> {
        &self.registry
    }

    pub fn detector(&self) -> &EncryptionDetector {
        &self.detector
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        self.scanner.set_progress_callback(callback);
    }

    pub fn detect(&self, path: &Path) -> DetectionResult {
        self.detector.detect(path)
    }

    pub fn scan(&self, inputs: &[PathBuf], recursive: bool) -> BatchReport {
        self.scanner.scan(inputs, recursive)
    }

    /// Recover one file with the configured program.
    pub fn recover(&self, path: &Path) -> Result<RecoveryOutcome, ConfigError> {
        self.recovery.recover_configured(path)
    }

    pub fn unlock(&self, inputs: &[PathBuf], recursive: bool) -> Result<UnlockReport, ConfigError> {
        self.scanner.unlock(inputs, recursive, &self.recovery)
    }

    /// Remove workspaces a crashed run left under the configured temp root.
    pub fn sweep_stale_workspaces(&self, max_age: std::time::Duration) -> std::io::Result<usize> {
        let root = self
            .config
            .settings
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        TempWorkspace::sweep_stale(&root, max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            DetectionStatus::Encrypted,
            DetectionStatus::Unencrypted,
            DetectionStatus::Unrecognized,
            DetectionStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RecoveryOutcome::recovered(Path::new("/d/b.pdf"), "/d/b_decrypted.pdf".into());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"]["kind"], "RECOVERED");
        assert_eq!(json["outcome"]["detail"], "/d/b_decrypted.pdf");

        let json = serde_json::to_value(RecoveryOutcome::unchanged(Path::new("/d/a.pdf"))).unwrap();
        assert_eq!(json["outcome"]["kind"], "UNCHANGED");
    }

    #[test]
    fn test_engine_rejects_bad_config() {
        let mut config = EngineConfig::default();
        config.headers.insert("zz".to_string(), "BAD".to_string());
        assert!(matches!(
            Engine::from_config(config, events::tracing_sink()),
            Err(ConfigError::InvalidHeader { .. })
        ));

        let mut config = EngineConfig::default();
        config.settings.max_threads = 0;
        assert!(matches!(
            Engine::from_config(config, events::tracing_sink()),
            Err(ConfigError::ZeroThreads)
        ));
    }

    #[test]
    fn test_batch_summary() {
        let report = BatchReport {
            run_id: "r".to_string(),
            results: vec![
                DetectionResult::matched(Path::new("a"), DetectionStatus::Encrypted, "X_ENCRYPTED".into()),
                DetectionResult::unrecognized(Path::new("b"), "extension not configured: .txt".into()),
                DetectionResult::error(Path::new("c"), "gone".into()),
            ],
            cancelled: false,
        };
        let summary = report.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.encrypted, 1);
        assert_eq!(summary.unrecognized, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(report.encrypted().count(), 1);
    }
}
