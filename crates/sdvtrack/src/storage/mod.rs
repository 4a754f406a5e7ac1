//! Blob storage for submitted files.
//!
//! Files are written once on submission and read back chunk by chunk
//! through byte-range reads.

use std::ops::Range;

use crate::error::StorageError;

pub mod filesystem;
pub mod memory;

pub use filesystem::FileBlobStore;
pub use memory::MemoryBlobStore;

/// Key-addressable, write-once byte storage.
pub trait BlobStore: Send + Sync {
    /// Stores `content` under `namespace/name` and returns its reference.
    fn put(&self, namespace: &str, name: &str, content: &[u8]) -> Result<String, StorageError>;

    /// Reads `range` (end exclusive) of a stored blob.
    fn read_range(&self, reference: &str, range: Range<u64>) -> Result<Vec<u8>, StorageError>;

    /// Deletes a blob. Returns `false` when it did not exist.
    fn delete(&self, reference: &str) -> Result<bool, StorageError>;
}

/// Rejects references that could escape the store's namespace.
pub(crate) fn validate_reference(reference: &str) -> Result<(), StorageError> {
    let bad = reference.is_empty()
        || reference.starts_with('/')
        || reference.contains('\\')
        || reference
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        Err(StorageError::InvalidReference(reference.to_string()))
    } else {
        Ok(())
    }
}

/// Builds a reference from its parts, validating the result.
pub(crate) fn make_reference(namespace: &str, name: &str) -> Result<String, StorageError> {
    let reference = format!("{}/{}", namespace, name);
    validate_reference(&reference)?;
    Ok(reference)
}

pub(crate) fn check_range(
    reference: &str,
    range: &Range<u64>,
    len: u64,
) -> Result<(), StorageError> {
    if range.start > range.end || range.end > len {
        return Err(StorageError::RangeOutOfBounds {
            reference: reference.to_string(),
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}
