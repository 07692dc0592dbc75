use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::detection::EncryptionDetector;
use crate::error::ConfigError;
use crate::events::{EngineEvent, EventKind};
use crate::recovery::RecoveryEngine;
use crate::{BatchReport, DetectionStatus, UnlockEntry, UnlockReport};

use super::walker::discover;

/// Progress of a running batch, reported after each file
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub completed: usize,
    pub total: usize,
    pub path: PathBuf,
}

/// Runs the detector (and optionally recovery) over a file set on a
/// bounded rayon pool. Reports keep discovery order whatever order the
/// workers finish in.
pub struct BatchScanner {
    detector: EncryptionDetector,
    pool: rayon::ThreadPool,
    cancel: CancellationToken,
    progress_callback: Option<Box<dyn Fn(ScanProgress) + Send + Sync>>,
}

impl BatchScanner {
    pub fn new(detector: EncryptionDetector, max_threads: usize) -> Result<Self, ConfigError> {
        if max_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_threads)
            .thread_name(|i| format!("docunlock-worker-{}", i))
            .build()
            .map_err(|e| ConfigError::ThreadPool(e.to_string()))?;

        Ok(Self {
            detector,
            pool,
            cancel: CancellationToken::new(),
            progress_callback: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn max_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Classify every file under `inputs`.
    pub fn scan(&self, inputs: &[PathBuf], recursive: bool) -> BatchReport {
        let run_id = Uuid::new_v4().to_string();
        let files = discover(inputs, recursive);
        self.emit_started(&run_id, inputs, files.len(), "scan");

        let (results, cancelled) =
            self.run_pool(&files, |path| self.detector.detect_in_run(path, Some(&run_id)));

        let report = BatchReport {
            run_id,
            results,
            cancelled,
        };
        self.emit_completed(&report.run_id, inputs, report.results.len(), files.len(), cancelled);
        report
    }

    /// Classify every file under `inputs` and hand each ENCRYPTED one to
    /// `engine`. Fails before touching any file when the engine has no
    /// usable program configured.
    pub fn unlock(
        &self,
        inputs: &[PathBuf],
        recursive: bool,
        engine: &RecoveryEngine,
    ) -> Result<UnlockReport, ConfigError> {
        let program = engine.configured_program()?;
        let timeout = engine.settings().timeout;

        let run_id = Uuid::new_v4().to_string();
        let files = discover(inputs, recursive);
        self.emit_started(&run_id, inputs, files.len(), "unlock");

        let (entries, cancelled) = self.run_pool(&files, |path| {
            let detection = self.detector.detect_in_run(path, Some(&run_id));
            let recovery = (detection.status == DetectionStatus::Encrypted).then(|| {
                engine.recover_in_run(path, &program, timeout, Some(&run_id), &self.cancel)
            });
            UnlockEntry {
                detection,
                recovery,
            }
        });

        let report = UnlockReport {
            run_id,
            entries,
            cancelled,
        };
        self.emit_completed(&report.run_id, inputs, report.entries.len(), files.len(), cancelled);
        Ok(report)
    }

    /// Apply `work` to each file on the pool. Files not started before
    /// cancellation are dropped; the flag reports whether that happened.
    fn run_pool<T, F>(&self, files: &[PathBuf], work: F) -> (Vec<T>, bool)
    where
        T: Send,
        F: Fn(&Path) -> T + Sync,
    {
        let total = files.len();
        let completed = AtomicUsize::new(0);

        let slots: Vec<Option<T>> = self.pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    let out = work(path);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit_progress(ScanProgress {
                        completed: done,
                        total,
                        path: path.clone(),
                    });
                    Some(out)
                })
                .collect()
        });

        let skipped = slots.iter().any(Option::is_none);
        let results = slots.into_iter().flatten().collect();
        (results, skipped || self.cancel.is_cancelled())
    }

    fn emit_progress(&self, progress: ScanProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }

    fn emit_started(&self, run_id: &str, inputs: &[PathBuf], files: usize, mode: &str) {
        self.detector.sink().emit(
            EngineEvent::new(
                EventKind::ScanStarted,
                batch_label(inputs),
                format!("{} files", files),
            )
            .with_run_id(Some(run_id))
            .with_metadata("mode", mode)
            .with_metadata("threads", self.max_threads().to_string()),
        );
    }

    fn emit_completed(
        &self,
        run_id: &str,
        inputs: &[PathBuf],
        finished: usize,
        total: usize,
        cancelled: bool,
    ) {
        let label = batch_label(inputs);
        if cancelled {
            self.detector.sink().emit(
                EngineEvent::new(
                    EventKind::Cancelled,
                    label,
                    format!("{} of {} files processed", finished, total),
                )
                .with_run_id(Some(run_id)),
            );
        }
        self.detector.sink().emit(
            EngineEvent::new(
                EventKind::ScanCompleted,
                label,
                format!("{} of {} files processed", finished, total),
            )
            .with_run_id(Some(run_id)),
        );
    }
}

/// Path recorded on batch-level events: the single input, or `.` for many.
fn batch_label(inputs: &[PathBuf]) -> &Path {
    match inputs {
        [single] => single.as_path(),
        _ => Path::new("."),
    }
}
