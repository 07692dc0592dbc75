/// Signature registry: header prefixes, labels and recognized extensions
use std::collections::BTreeSet;
use std::path::Path;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DuplicateSignatureError};

/// Built-in plaintext document signatures as `(hex prefix, label)`.
pub const DEFAULT_DOCUMENT_SIGNATURES: &[(&str, &str)] = &[
    ("25504446", "PDF"),               // %PDF
    ("504b0304", "OOXML"),             // PK (ZIP-based Office / WPS)
    ("d0cf11e0a1b11ae1", "OLE2"),      // Compound File (legacy Office / WPS)
    ("7b5c727466", "RTF"),             // {\rtf
];

/// Built-in document extensions.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".pdf", ".rtf", ".wps", ".et", ".dps",
];

/// Whether a signature marks a plaintext document or an encrypted wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Plain,
    Encrypted,
}

impl SignatureKind {
    /// Derive the kind from a label: any standalone `ENCRYPTED` token marks an
    /// encrypted wrapper (`PDF_ENCRYPTED`, `wps-encrypted`), anything else is plain.
    pub fn from_label(label: &str) -> Self {
        let encrypted = label
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token.eq_ignore_ascii_case("encrypted"));
        if encrypted {
            SignatureKind::Encrypted
        } else {
            SignatureKind::Plain
        }
    }
}

/// A known leading byte sequence and the format it identifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub header_prefix: Vec<u8>,
    pub label: String,
    pub kind: SignatureKind,
}

impl Signature {
    pub fn prefix_hex(&self) -> String {
        hex::encode(&self.header_prefix)
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        data.starts_with(&self.header_prefix)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Registration order is significant for tie-breaking.
    signatures: Vec<Signature>,
    extensions: BTreeSet<String>,
}

/// Table of header signatures and recognized extensions.
///
/// Reads take a shared lock, so any number of detector workers can consult
/// the registry at once. Inserts are rare (startup, config edits) and take
/// the write lock briefly.
///
/// Conflict policy: registering a prefix that already maps to a different
/// label is rejected with [`DuplicateSignatureError`]; re-registering the
/// same pair is a no-op.
#[derive(Debug, Default)]
pub struct SignatureRegistry {
    state: RwLock<RegistryState>,
}

impl SignatureRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in document signatures and extensions
    pub fn document_defaults() -> Self {
        let registry = Self::new();
        for (hex_prefix, label) in DEFAULT_DOCUMENT_SIGNATURES {
            // The built-in table is conflict-free and valid hex.
            if let Err(e) = registry.add_hex_signature(hex_prefix, label) {
                tracing::error!("built-in signature {} rejected: {}", hex_prefix, e);
            }
        }
        for ext in DEFAULT_EXTENSIONS {
            if let Err(e) = registry.add_extension(ext) {
                tracing::error!("built-in extension {} rejected: {}", ext, e);
            }
        }
        registry
    }

    /// Registers a signature, deriving its kind from the label.
    pub fn add_signature(
        &self,
        header_prefix: impl Into<Vec<u8>>,
        label: impl Into<String>,
    ) -> Result<(), DuplicateSignatureError> {
        let label = label.into();
        let kind = SignatureKind::from_label(&label);
        self.add_signature_with_kind(header_prefix, label, kind)
    }

    /// Registers a signature with an explicit kind.
    ///
    /// An empty prefix would match every file, so it is treated as a conflict
    /// with the implicit "anything" signature and rejected.
    pub fn add_signature_with_kind(
        &self,
        header_prefix: impl Into<Vec<u8>>,
        label: impl Into<String>,
        kind: SignatureKind,
    ) -> Result<(), DuplicateSignatureError> {
        let header_prefix = header_prefix.into();
        let label = label.into();

        if header_prefix.is_empty() {
            return Err(DuplicateSignatureError {
                prefix_hex: String::new(),
                existing: "<any file>".to_string(),
                requested: label,
            });
        }

        let mut state = self.state.write();
        if let Some(existing) = state
            .signatures
            .iter_mut()
            .find(|s| s.header_prefix == header_prefix)
        {
            if existing.label != label {
                return Err(DuplicateSignatureError {
                    prefix_hex: hex::encode(&header_prefix),
                    existing: existing.label.clone(),
                    requested: label,
                });
            }
            existing.kind = kind;
            return Ok(());
        }

        tracing::debug!(
            "registered signature {} -> {} ({:?})",
            hex::encode(&header_prefix),
            label,
            kind
        );
        state.signatures.push(Signature {
            header_prefix,
            label,
            kind,
        });
        Ok(())
    }

    /// Parses a hex prefix (`"25504446"`, `"0x25 50 44 46"`) and registers it.
    pub fn add_hex_signature(&self, hex_prefix: &str, label: &str) -> Result<(), ConfigError> {
        let bytes = parse_hex_prefix(hex_prefix)?;
        self.add_signature(bytes, label)?;
        Ok(())
    }

    /// Adds a recognized extension. Returns `true` if it was not known before.
    pub fn add_extension(&self, ext: &str) -> Result<bool, ConfigError> {
        let normalized =
            normalize_extension(ext).ok_or_else(|| ConfigError::InvalidExtension(ext.to_string()))?;
        Ok(self.state.write().extensions.insert(normalized))
    }

    /// Case-insensitive; accepts the extension with or without its leading dot.
    pub fn has_extension(&self, ext: &str) -> bool {
        self.view().has_extension(ext)
    }

    /// Label of the longest registered prefix of `data`.
    pub fn lookup_by_header(&self, data: &[u8]) -> Option<String> {
        self.view().match_header(data).map(|sig| sig.label.clone())
    }

    pub fn match_header(&self, data: &[u8]) -> Option<Signature> {
        self.view().match_header(data).cloned()
    }

    pub fn shortest_prefix_len(&self) -> Option<usize> {
        self.view().shortest_prefix_len()
    }

    pub fn longest_prefix_len(&self) -> Option<usize> {
        self.view().longest_prefix_len()
    }

    /// Consistent read-only view. Inserts wait until every view is dropped,
    /// so one detection never sees a half-updated table.
    pub fn view(&self) -> RegistryView<'_> {
        RegistryView {
            state: self.state.read(),
        }
    }

    /// Snapshot of all signatures in registration order
    pub fn signatures(&self) -> Vec<Signature> {
        self.state.read().signatures.clone()
    }

    /// Snapshot of the recognized extensions, sorted
    pub fn extensions(&self) -> Vec<String> {
        self.state.read().extensions.iter().cloned().collect()
    }

    pub fn signature_count(&self) -> usize {
        self.state.read().signatures.len()
    }
}

/// Shared-lock view over a [`SignatureRegistry`]
pub struct RegistryView<'a> {
    state: RwLockReadGuard<'a, RegistryState>,
}

impl RegistryView<'_> {
    pub fn has_extension(&self, ext: &str) -> bool {
        normalize_extension(ext).is_some_and(|n| self.state.extensions.contains(&n))
    }

    /// Longest registered prefix of `data`; the first registered wins a tie.
    pub fn match_header(&self, data: &[u8]) -> Option<&Signature> {
        let mut best: Option<&Signature> = None;
        for sig in self.state.signatures.iter().filter(|s| s.matches(data)) {
            match best {
                Some(current) if current.header_prefix.len() >= sig.header_prefix.len() => {}
                _ => best = Some(sig),
            }
        }
        best
    }

    pub fn shortest_prefix_len(&self) -> Option<usize> {
        self.state.signatures.iter().map(|s| s.header_prefix.len()).min()
    }

    pub fn longest_prefix_len(&self) -> Option<usize> {
        self.state.signatures.iter().map(|s| s.header_prefix.len()).max()
    }
}

/// Lowercase, leading dot, no separators. `None` for unusable input.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim();
    let bare = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if bare.is_empty()
        || bare
            .chars()
            .any(|c| c == '.' || c == '/' || c == '\\' || c.is_whitespace())
    {
        return None;
    }
    Some(format!(".{}", bare.to_lowercase()))
}

/// Normalized extension of a path, if it has one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(normalize_extension)
}

/// Decode a configured header prefix.
pub fn parse_hex_prefix(input: &str) -> Result<Vec<u8>, ConfigError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);

    if digits.is_empty() {
        return Err(ConfigError::InvalidHeader {
            hex: input.to_string(),
            reason: "empty prefix".to_string(),
        });
    }

    hex::decode(digits).map_err(|e| ConfigError::InvalidHeader {
        hex: input.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_label() {
        assert_eq!(SignatureKind::from_label("PDF"), SignatureKind::Plain);
        assert_eq!(
            SignatureKind::from_label("PDF_ENCRYPTED"),
            SignatureKind::Encrypted
        );
        assert_eq!(
            SignatureKind::from_label("wps-encrypted"),
            SignatureKind::Encrypted
        );
        assert_eq!(SignatureKind::from_label("UNENCRYPTED"), SignatureKind::Plain);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = SignatureRegistry::new();
        registry.add_signature(vec![0x50u8, 0x4B], "ZIP").unwrap();
        registry
            .add_signature(vec![0x50u8, 0x4B, 0x03, 0x04], "OOXML")
            .unwrap();

        let data = [0x50, 0x4B, 0x03, 0x04, 0x14, 0x00];
        assert_eq!(registry.lookup_by_header(&data), Some("OOXML".to_string()));
        assert_eq!(
            registry.lookup_by_header(&[0x50, 0x4B, 0x05, 0x06]),
            Some("ZIP".to_string())
        );
        assert_eq!(registry.lookup_by_header(&[0x00]), None);
    }

    #[test]
    fn test_conflicting_label_rejected() {
        let registry = SignatureRegistry::new();
        registry.add_signature(b"%PDF".to_vec(), "PDF").unwrap();
        // Same pair is idempotent
        registry.add_signature(b"%PDF".to_vec(), "PDF").unwrap();
        assert_eq!(registry.signature_count(), 1);

        let err = registry
            .add_signature(b"%PDF".to_vec(), "OTHER")
            .unwrap_err();
        assert_eq!(err.existing, "PDF");
        assert_eq!(err.requested, "OTHER");
        assert_eq!(err.prefix_hex, "25504446");
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let registry = SignatureRegistry::new();
        assert!(registry.add_signature(Vec::<u8>::new(), "ANY").is_err());
        assert_eq!(registry.signature_count(), 0);
    }

    #[test]
    fn test_extensions_normalized() {
        let registry = SignatureRegistry::new();
        assert!(registry.add_extension("PDF").unwrap());
        assert!(!registry.add_extension(".pdf").unwrap());
        assert!(registry.has_extension(".PDF"));
        assert!(registry.has_extension("pdf"));
        assert!(!registry.has_extension(".docx"));
        assert_eq!(registry.extensions(), vec![".pdf".to_string()]);

        assert!(registry.add_extension("").is_err());
        assert!(registry.add_extension("tar.gz").is_err());
    }

    #[test]
    fn test_prefix_length_bounds() {
        let registry = SignatureRegistry::new();
        assert_eq!(registry.shortest_prefix_len(), None);
        registry.add_hex_signature("000000", "PDF_ENCRYPTED").unwrap();
        registry.add_hex_signature("25504446", "PDF").unwrap();
        assert_eq!(registry.shortest_prefix_len(), Some(3));
        assert_eq!(registry.longest_prefix_len(), Some(4));
    }

    #[test]
    fn test_parse_hex_prefix() {
        assert_eq!(parse_hex_prefix("25504446").unwrap(), b"%PDF".to_vec());
        assert_eq!(parse_hex_prefix("0x25 50 44 46").unwrap(), b"%PDF".to_vec());
        assert_eq!(parse_hex_prefix("D0CF").unwrap(), vec![0xD0, 0xCF]);
        assert!(parse_hex_prefix("").is_err());
        assert!(parse_hex_prefix("abc").is_err());
        assert!(parse_hex_prefix("zz").is_err());
    }

    #[test]
    fn test_document_defaults() {
        let registry = SignatureRegistry::document_defaults();
        assert_eq!(registry.signature_count(), DEFAULT_DOCUMENT_SIGNATURES.len());
        assert!(registry.has_extension(".docx"));
        assert_eq!(
            registry.lookup_by_header(b"%PDF-1.7"),
            Some("PDF".to_string())
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("/a/B.PDF")), Some(".pdf".to_string()));
        assert_eq!(extension_of(Path::new("/a/README")), None);
    }
}
