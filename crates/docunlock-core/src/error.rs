//! Error taxonomy for the detection and recovery engine.
//!
//! Per-file failures are captured as values in reports; only configuration
//! errors abort an operation before it starts.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A path could not be inspected.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotRegularFile(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PathError {
    /// Classify an I/O error raised while touching `path`.
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            PathError::NotFound(path)
        } else {
            PathError::Unreadable { path, source }
        }
    }
}

/// Conflicting registry insert: the prefix already maps to another label.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("header {prefix_hex} is already registered as '{existing}', refusing '{requested}'")]
pub struct DuplicateSignatureError {
    pub prefix_hex: String,
    pub existing: String,
    pub requested: String,
}

/// Temporary workspace creation, copy, promotion or cleanup failed.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {}: {source}", .root.display())]
    Create {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {} into workspace: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to promote workspace copy to {}: {source}", .target.display())]
    Promote {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove workspace {}: {source}", .dir.display())]
    Cleanup {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("a recovery of {} is already in progress", .0.display())]
    Busy(PathBuf),
}

/// The external program could not do its job.
#[derive(Error, Debug)]
pub enum ExternalProgramError {
    #[error("failed to launch {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited with {status}{}", .program.display(), stderr_suffix(.stderr))]
    NonZeroExit {
        program: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("timeout after {}s", .0.as_secs_f32())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("failed while waiting for {}: {source}", .program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Terminal classification: the tool declines to judge this file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnrecognizedFormatError {
    #[error("extension not configured: {0}")]
    Extension(String),

    #[error("file is shorter than any known header ({0} bytes)")]
    TooShort(usize),

    #[error("header {0} matches no known signature")]
    UnknownHeader(String),
}

/// Configuration-level failures. These are fatal and surface before any scan.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid header hex '{hex}': {reason}")]
    InvalidHeader { hex: String, reason: String },

    #[error("invalid extension '{0}'")]
    InvalidExtension(String),

    #[error(transparent)]
    Duplicate(#[from] DuplicateSignatureError),

    #[error("max_threads must be at least 1")]
    ZeroThreads,

    #[error("no external program configured; set settings.external_program_path")]
    MissingProgram,

    #[error("external program not found: {}", .0.display())]
    ProgramNotFound(PathBuf),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("cannot determine a configuration directory")]
    NoConfigDir,

    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write config {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Any failure of a single recovery attempt.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Program(#[from] ExternalProgramError),

    #[error("external program reported success but the file is still encrypted")]
    StillEncrypted,

    #[error("re-saved file could not be verified: {0}")]
    Unverified(String),
}
