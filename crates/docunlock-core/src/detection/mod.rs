/// Header-signature based encryption detection
pub mod detector;
pub mod registry;

pub use detector::{read_header, Classification, EncryptionDetector, MIN_HEADER_WINDOW};
pub use registry::{
    extension_of, normalize_extension, parse_hex_prefix, Signature, SignatureKind,
    SignatureRegistry, DEFAULT_DOCUMENT_SIGNATURES, DEFAULT_EXTENSIONS,
};
