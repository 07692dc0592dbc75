/// SHA-256 digests used to prove an original survived a failed attempt
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    /// Hexadecimal SHA-256
    pub sha256: String,
    pub size: u64,
}

/// Hash a file in 8 KiB chunks
pub fn sha256_file(path: impl AsRef<Path>) -> io::Result<FileDigest> {
    let mut file = File::open(path.as_ref())?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(FileDigest {
        sha256: format!("{:x}", hasher.finalize()),
        size,
    })
}
