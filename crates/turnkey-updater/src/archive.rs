//! Update package extraction.

use crate::error::{UpdateError, UpdateResult};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;
use turnkey_network::{ArchiveFormat, UpdateMetadata};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Check `data` against the declared hash and size, when declared.
pub fn verify_package(data: &[u8], metadata: &UpdateMetadata) -> UpdateResult<()> {
    if let Some(expected) = metadata.hash.as_deref() {
        let actual = sha256_hex(data);
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(UpdateError::HashMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }
    if let Some(expected) = metadata.size {
        let actual = data.len() as u64;
        if actual != expected {
            return Err(UpdateError::SizeMismatch { expected, actual });
        }
    }
    debug!(update_id = %metadata.id, bytes = data.len(), "package verified");
    Ok(())
}

/// Unpack `data` into `dest`, which must exist.
pub fn extract(data: &[u8], format: &ArchiveFormat, dest: &Path) -> UpdateResult<()> {
    match format {
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(Cursor::new(data)))
            .unpack(dest)
            .map_err(UpdateError::archive),
        ArchiveFormat::Zip => zip::ZipArchive::new(Cursor::new(data))
            .and_then(|mut archive| archive.extract(dest))
            .map_err(UpdateError::archive),
        ArchiveFormat::Other(other) => Err(UpdateError::UnsupportedFormat(other.clone())),
    }
}
