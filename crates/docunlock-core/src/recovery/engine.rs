use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::config::{check_program, OutputMode, Settings};
use crate::detection::{Classification, EncryptionDetector};
use crate::error::{ConfigError, ExternalProgramError, RecoveryError, WorkspaceError};
use crate::events::{EngineEvent, EventKind};
use crate::integrity::{sha256_file, FileDigest};
use crate::RecoveryOutcome;

use super::process::ExternalProgram;
use super::workspace::{alongside_path, TempWorkspace};

/// Recovery knobs taken from [`Settings`] at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverySettings {
    pub program: Option<PathBuf>,
    pub program_args: Vec<String>,
    pub timeout: Duration,
    pub output_mode: OutputMode,
    pub output_suffix: String,
    /// Workspace root; system temp dir when `None`
    pub temp_root: Option<PathBuf>,
}

impl RecoverySettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            program: settings.external_program_path.clone(),
            program_args: settings.program_args.clone(),
            timeout: settings.timeout(),
            output_mode: settings.output_mode,
            output_suffix: settings.output_suffix.clone(),
            temp_root: settings.temp_dir.clone(),
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Drives one external re-save per call: workspace, program, verification,
/// promotion, cleanup.
///
/// The original is only ever read until a verified result is promoted, so a
/// failed attempt leaves it byte-identical. Two concurrent attempts on the
/// same original are refused rather than queued.
#[derive(Clone)]
pub struct RecoveryEngine {
    detector: EncryptionDetector,
    settings: RecoverySettings,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    cancel: CancellationToken,
}

impl RecoveryEngine {
    pub fn new(detector: EncryptionDetector, settings: RecoverySettings) -> Self {
        Self {
            detector,
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    pub fn detector(&self) -> &EncryptionDetector {
        &self.detector
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The configured program with its argument template.
    ///
    /// Fails when no program is set or a program path does not exist.
    pub fn configured_program(&self) -> Result<ExternalProgram, ConfigError> {
        let program = self
            .settings
            .program
            .as_deref()
            .ok_or(ConfigError::MissingProgram)?;
        check_program(program)?;
        Ok(ExternalProgram::new(program).with_args(self.settings.program_args.clone()))
    }

    /// Re-save `path` with `program`, waiting at most `timeout`.
    pub fn recover(&self, path: &Path, program: &Path, timeout: Duration) -> RecoveryOutcome {
        let program = ExternalProgram::new(program).with_args(self.settings.program_args.clone());
        self.recover_with(path, &program, timeout)
    }

    /// Re-save `path` with the configured program and timeout.
    pub fn recover_configured(&self, path: &Path) -> Result<RecoveryOutcome, ConfigError> {
        let program = self.configured_program()?;
        Ok(self.recover_with(path, &program, self.settings.timeout))
    }

    pub fn recover_with(
        &self,
        path: &Path,
        program: &ExternalProgram,
        timeout: Duration,
    ) -> RecoveryOutcome {
        self.recover_in_run(path, program, timeout, None, &self.cancel)
    }

    /// One attempt; `batch_cancel` is honored alongside the engine's own token.
    pub(crate) fn recover_in_run(
        &self,
        path: &Path,
        program: &ExternalProgram,
        timeout: Duration,
        run_id: Option<&str>,
        batch_cancel: &CancellationToken,
    ) -> RecoveryOutcome {
        let attempt = Attempt {
            engine: self,
            path,
            run_id,
            batch_cancel,
        };
        attempt.run(program, timeout)
    }
}

/// Per-call context so event emission does not need every argument threaded.
struct Attempt<'a> {
    engine: &'a RecoveryEngine,
    path: &'a Path,
    run_id: Option<&'a str>,
    batch_cancel: &'a CancellationToken,
}

impl Attempt<'_> {
    fn run(&self, program: &ExternalProgram, timeout: Duration) -> RecoveryOutcome {
        self.emit(EngineEvent::new(
            EventKind::RecoveryStarted,
            self.path,
            program.program().display().to_string(),
        ));

        if self.is_cancelled() {
            return self.fail(ExternalProgramError::Cancelled.to_string());
        }

        let _guard = match InFlightGuard::acquire(&self.engine.in_flight, self.path) {
            Ok(guard) => guard,
            Err(e) => return self.fail(e.to_string()),
        };

        let skip_reason = match self.engine.detector.classify(self.path) {
            Ok(Classification::Encrypted { .. }) => None,
            Ok(Classification::Unencrypted { label }) => Some(format!("not encrypted ({})", label)),
            Ok(Classification::Unrecognized(reason)) => Some(reason.to_string()),
            Err(e) => return self.fail(e.to_string()),
        };
        if let Some(reason) = skip_reason {
            self.emit(
                EngineEvent::new(EventKind::FileDetected, self.path, reason)
                    .with_metadata("outcome", "UNCHANGED"),
            );
            return RecoveryOutcome::unchanged(self.path);
        }

        let before = match sha256_file(self.path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                tracing::warn!("could not hash {}: {}", self.path.display(), e);
                None
            }
        };

        match self.in_workspace(program, timeout) {
            Ok(new_path) => {
                self.emit(EngineEvent::new(
                    EventKind::FileRecovered,
                    self.path,
                    new_path.display().to_string(),
                ));
                RecoveryOutcome::recovered(self.path, new_path)
            }
            Err(e) => {
                let mut reason = e.to_string();
                if let Some(before) = before {
                    if self.original_changed(&before) {
                        reason.push_str("; original was modified during the attempt");
                    }
                }
                self.fail(reason)
            }
        }
    }

    /// Create the workspace, do the work, always remove the workspace.
    fn in_workspace(
        &self,
        program: &ExternalProgram,
        timeout: Duration,
    ) -> Result<PathBuf, RecoveryError> {
        let settings = &self.engine.settings;
        let workspace = TempWorkspace::create(self.path, settings.temp_root.as_deref())?;
        self.emit(EngineEvent::new(
            EventKind::WorkspaceCreated,
            self.path,
            workspace.dir().display().to_string(),
        ));

        let result = self.resave_and_promote(&workspace, program, timeout);

        let dir = workspace.dir().to_path_buf();
        match workspace.close() {
            Ok(()) => self.emit(EngineEvent::new(
                EventKind::WorkspaceCleaned,
                self.path,
                dir.display().to_string(),
            )),
            Err(e) => self.emit(EngineEvent::new(
                EventKind::CleanupFailed,
                self.path,
                e.to_string(),
            )),
        }
        result
    }

    fn resave_and_promote(
        &self,
        workspace: &TempWorkspace,
        program: &ExternalProgram,
        timeout: Duration,
    ) -> Result<PathBuf, RecoveryError> {
        self.emit(
            EngineEvent::new(
                EventKind::ProgramInvoked,
                self.path,
                program.render_args(workspace.file_path()).join(" "),
            )
            .with_metadata("program", program.program().display().to_string())
            .with_metadata("timeout_secs", timeout.as_secs().to_string()),
        );

        if let Err(e) = program.run(
            workspace.file_path(),
            timeout,
            &workspace.stderr_path(),
            || self.is_cancelled(),
        ) {
            let kind = match e {
                ExternalProgramError::TimedOut(_) => EventKind::ProgramTimedOut,
                ExternalProgramError::Cancelled => EventKind::Cancelled,
                _ => EventKind::ProgramFailed,
            };
            self.emit(EngineEvent::new(kind, self.path, e.to_string()));
            return Err(e.into());
        }

        match self.engine.detector.classify(workspace.file_path()) {
            Ok(Classification::Unencrypted { .. }) => {}
            Ok(Classification::Encrypted { .. }) => {
                self.emit(EngineEvent::new(
                    EventKind::ProgramFailed,
                    self.path,
                    RecoveryError::StillEncrypted.to_string(),
                ));
                return Err(RecoveryError::StillEncrypted);
            }
            Ok(Classification::Unrecognized(reason)) => {
                return Err(RecoveryError::Unverified(reason.to_string()))
            }
            Err(e) => return Err(RecoveryError::Unverified(e.to_string())),
        }

        let settings = &self.engine.settings;
        let target = match settings.output_mode {
            OutputMode::Alongside => alongside_path(self.path, &settings.output_suffix),
            OutputMode::Replace => self.path.to_path_buf(),
        };
        workspace.promote(&target, settings.output_mode == OutputMode::Replace)?;
        Ok(target)
    }

    fn original_changed(&self, before: &FileDigest) -> bool {
        let changed = match sha256_file(self.path) {
            Ok(after) => &after != before,
            Err(_) => true,
        };
        if changed {
            self.emit(
                EngineEvent::new(
                    EventKind::OriginalModified,
                    self.path,
                    "original differs from its pre-attempt digest",
                )
                .with_metadata("sha256_before", before.sha256.clone()),
            );
        }
        changed
    }

    fn fail(&self, reason: String) -> RecoveryOutcome {
        self.emit(EngineEvent::new(
            EventKind::RecoveryFailed,
            self.path,
            reason.clone(),
        ));
        RecoveryOutcome::failed(self.path, reason)
    }

    fn is_cancelled(&self) -> bool {
        self.batch_cancel.is_cancelled() || self.engine.cancel.is_cancelled()
    }

    fn emit(&self, event: EngineEvent) {
        self.engine.detector.sink().emit(event.with_run_id(self.run_id));
    }
}

/// Membership in the in-flight set for the lifetime of one attempt.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    key: PathBuf,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<PathBuf>>>, path: &Path) -> Result<Self, WorkspaceError> {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !set.lock().insert(key.clone()) {
            return Err(WorkspaceError::Busy(path.to_path_buf()));
        }
        Ok(Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}
