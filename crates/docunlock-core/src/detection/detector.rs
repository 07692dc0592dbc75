/// Single-file encryption classification
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::detection::registry::{extension_of, SignatureKind, SignatureRegistry};
use crate::error::{PathError, UnrecognizedFormatError};
use crate::events::{tracing_sink, EngineEvent, EventKind, Severity, SharedSink};
use crate::{DetectionResult, DetectionStatus};

/// Minimum number of leading bytes inspected per file.
pub const MIN_HEADER_WINDOW: usize = 16;

/// Outcome of inspecting a readable file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Encrypted { label: String },
    Unencrypted { label: String },
    Unrecognized(UnrecognizedFormatError),
}

/// Classifies files against a shared [`SignatureRegistry`].
#[derive(Clone)]
pub struct EncryptionDetector {
    registry: Arc<SignatureRegistry>,
    sink: SharedSink,
}

impl EncryptionDetector {
    pub fn new(registry: Arc<SignatureRegistry>) -> Self {
        Self::with_sink(registry, tracing_sink())
    }

    pub fn with_sink(registry: Arc<SignatureRegistry>, sink: SharedSink) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &Arc<SignatureRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Classify `path`. Never fails: I/O problems come back as
    /// [`DetectionStatus::Error`] with the cause in `error_detail`.
    pub fn detect(&self, path: &Path) -> DetectionResult {
        self.detect_in_run(path, None)
    }

    pub(crate) fn detect_in_run(&self, path: &Path, run_id: Option<&str>) -> DetectionResult {
        let result = match self.classify(path) {
            Ok(Classification::Encrypted { label }) => {
                DetectionResult::matched(path, DetectionStatus::Encrypted, label)
            }
            Ok(Classification::Unencrypted { label }) => {
                DetectionResult::matched(path, DetectionStatus::Unencrypted, label)
            }
            Ok(Classification::Unrecognized(reason)) => {
                let event = match &reason {
                    UnrecognizedFormatError::UnknownHeader(_) => {
                        EngineEvent::new(EventKind::UnknownHeader, path, reason.to_string())
                    }
                    _ => EngineEvent::new(EventKind::FileDetected, path, reason.to_string())
                        .with_severity(Severity::Debug),
                };
                self.sink.emit(event.with_run_id(run_id));
                return DetectionResult::unrecognized(path, reason.to_string());
            }
            Err(e) => {
                self.sink.emit(
                    EngineEvent::new(EventKind::DetectionFailed, path, e.to_string())
                        .with_run_id(run_id),
                );
                return DetectionResult::error(path, e.to_string());
            }
        };

        let mut event = EngineEvent::new(EventKind::FileDetected, path, result.status.to_string())
            .with_run_id(run_id);
        if let Some(label) = &result.matched_label {
            event = event.with_metadata("label", label.clone());
        }
        self.sink.emit(event);
        result
    }

    /// Inspect `path` without emitting events.
    ///
    /// Order: existence and file type, then the extension pre-filter, then
    /// the header window. A file with an unconfigured extension is never read.
    pub fn classify(&self, path: &Path) -> Result<Classification, PathError> {
        let metadata = fs::metadata(path).map_err(|e| PathError::from_io(path, e))?;
        if !metadata.is_file() {
            return Err(PathError::NotRegularFile(path.to_path_buf()));
        }

        let registry = self.registry.view();
        match extension_of(path) {
            Some(ext) if registry.has_extension(&ext) => {}
            Some(ext) => {
                return Ok(Classification::Unrecognized(
                    UnrecognizedFormatError::Extension(ext),
                ))
            }
            None => {
                return Ok(Classification::Unrecognized(
                    UnrecognizedFormatError::Extension("<none>".to_string()),
                ))
            }
        }

        let window_len = registry
            .longest_prefix_len()
            .unwrap_or(0)
            .max(MIN_HEADER_WINDOW);
        let header = read_header(path, window_len)?;

        // An empty table can match nothing, whatever the file length.
        let shortest = registry.shortest_prefix_len().unwrap_or(usize::MAX);
        if header.len() < shortest {
            return Ok(Classification::Unrecognized(
                UnrecognizedFormatError::TooShort(header.len()),
            ));
        }

        Ok(match registry.match_header(&header) {
            Some(sig) => match sig.kind {
                SignatureKind::Encrypted => Classification::Encrypted {
                    label: sig.label.clone(),
                },
                SignatureKind::Plain => Classification::Unencrypted {
                    label: sig.label.clone(),
                },
            },
            None => Classification::Unrecognized(UnrecognizedFormatError::UnknownHeader(
                hex::encode(&header),
            )),
        })
    }
}

/// Read at most `len` leading bytes.
pub fn read_header(path: &Path, len: usize) -> Result<Vec<u8>, PathError> {
    let file = File::open(path).map_err(|e| PathError::from_io(path, e))?;
    let mut header = Vec::with_capacity(len);
    file.take(len as u64)
        .read_to_end(&mut header)
        .map_err(|e| PathError::from_io(path, e))?;
    Ok(header)
}
