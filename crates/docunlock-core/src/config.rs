//! Engine configuration
//!
//! The engine never reads configuration on its own: callers load an
//! [`EngineConfig`] (usually from `config.json` in the user's config
//! directory) and hand it to the components at construction time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detection::registry::{
    normalize_extension, parse_hex_prefix, SignatureRegistry, DEFAULT_DOCUMENT_SIGNATURES,
    DEFAULT_EXTENSIONS,
};
use crate::error::{ConfigError, DuplicateSignatureError};

/// Placeholder substituted with the workspace copy in `program_args`.
pub const FILE_PLACEHOLDER: &str = "{file}";

const CONFIG_DIR_NAME: &str = "docunlock";
const CONFIG_FILE_NAME: &str = "config.json";

/// Where a successfully re-saved file ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Next to the original as `<stem><suffix>.<ext>`
    #[default]
    Alongside,
    /// Atomically over the original
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker pool size
    pub max_threads: usize,
    /// Per-file limit for the external program
    pub timeout_secs: u64,
    #[serde(alias = "wps_path")]
    pub external_program_path: Option<PathBuf>,
    /// Argument template; `{file}` is replaced by the copy to re-save
    pub program_args: Vec<String>,
    pub output_mode: OutputMode,
    pub output_suffix: String,
    /// Root for recovery workspaces; system temp dir when unset
    pub temp_dir: Option<PathBuf>,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_threads: 5,
            timeout_secs: 60,
            external_program_path: None,
            program_args: vec![FILE_PLACEHOLDER.to_string()],
            output_mode: OutputMode::Alongside,
            output_suffix: "_decrypted".to_string(),
            temp_dir: None,
            debug: false,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `{extensions, headers: {hex: label}, settings}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub extensions: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub settings: Settings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            headers: DEFAULT_DOCUMENT_SIGNATURES
                .iter()
                .map(|(hex, label)| (hex.to_string(), label.to_string()))
                .collect(),
            settings: Settings::default(),
        }
    }
}

impl EngineConfig {
    /// `<config dir>/docunlock/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            "loaded config {} ({} extensions, {} headers)",
            path.display(),
            config.extensions.len(),
            config.headers.len()
        );
        Ok(config)
    }

    /// Defaults when the file does not exist yet; any other failure is reported.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        fs::write(path, json).map_err(write_err)?;
        tracing::info!("saved config to {}", path.display());
        Ok(())
    }

    /// Adds a normalized extension. Returns `false` if it was already present.
    pub fn add_extension(&mut self, ext: &str) -> Result<bool, ConfigError> {
        let normalized =
            normalize_extension(ext).ok_or_else(|| ConfigError::InvalidExtension(ext.to_string()))?;
        if self
            .extensions
            .iter()
            .any(|e| normalize_extension(e).as_deref() == Some(normalized.as_str()))
        {
            return Ok(false);
        }
        self.extensions.push(normalized);
        Ok(true)
    }

    /// Adds a header mapping, keyed by lowercase hex. Rejects a prefix that
    /// already maps to another label. Returns `false` for an exact repeat.
    pub fn add_header(&mut self, hex_prefix: &str, label: &str) -> Result<bool, ConfigError> {
        let key = hex::encode(parse_hex_prefix(hex_prefix)?);
        let label = label.trim();
        if label.is_empty() {
            return Err(ConfigError::InvalidHeader {
                hex: hex_prefix.to_string(),
                reason: "empty label".to_string(),
            });
        }

        for (existing_hex, existing_label) in &self.headers {
            if parse_hex_prefix(existing_hex).ok().map(hex::encode).as_deref() == Some(key.as_str()) {
                if existing_label == label {
                    return Ok(false);
                }
                return Err(DuplicateSignatureError {
                    prefix_hex: key,
                    existing: existing_label.clone(),
                    requested: label.to_string(),
                }
                .into());
            }
        }

        self.headers.insert(key, label.to_string());
        Ok(true)
    }

    /// Build a registry holding exactly the configured extensions and headers.
    pub fn build_registry(&self) -> Result<SignatureRegistry, ConfigError> {
        let registry = SignatureRegistry::new();
        for ext in &self.extensions {
            registry.add_extension(ext)?;
        }
        for (hex_prefix, label) in &self.headers {
            registry.add_hex_signature(hex_prefix, label)?;
        }
        Ok(registry)
    }

    /// Checks everything that would otherwise fail later at construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.max_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        self.build_registry()?;
        Ok(())
    }

    /// The configured program, required before any recovery starts.
    pub fn require_program(&self) -> Result<&Path, ConfigError> {
        let program = self
            .settings
            .external_program_path
            .as_deref()
            .ok_or(ConfigError::MissingProgram)?;
        check_program(program)?;
        Ok(program)
    }
}

/// A path with a directory component must exist; a bare name is left to
/// the OS search path at launch time.
pub fn check_program(program: &Path) -> Result<(), ConfigError> {
    if program.as_os_str().is_empty() {
        return Err(ConfigError::MissingProgram);
    }
    let has_dir = program
        .parent()
        .is_some_and(|p| !p.as_os_str().is_empty());
    if has_dir && !program.exists() {
        return Err(ConfigError::ProgramNotFound(program.to_path_buf()));
    }
    Ok(())
}
