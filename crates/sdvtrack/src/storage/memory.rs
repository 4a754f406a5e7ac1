use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use super::{check_range, make_reference, validate_reference, BlobStore};
use crate::error::StorageError;

/// In-process blob store, for tests and embedded use.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Arc<[u8]>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.blobs
            .lock()
            .map(|b| b.contains_key(reference))
            .unwrap_or(false)
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, namespace: &str, name: &str, content: &[u8]) -> Result<String, StorageError> {
        let reference = make_reference(namespace, name)?;
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::LockPoisoned)?;
        if blobs.contains_key(&reference) {
            return Err(StorageError::Write {
                reference,
                source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            });
        }
        blobs.insert(reference.clone(), Arc::from(content));
        Ok(reference)
    }

    fn read_range(&self, reference: &str, range: Range<u64>) -> Result<Vec<u8>, StorageError> {
        validate_reference(reference)?;
        let blob = {
            let blobs = self.blobs.lock().map_err(|_| StorageError::LockPoisoned)?;
            blobs
                .get(reference)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(reference.to_string()))?
        };
        check_range(reference, &range, blob.len() as u64)?;
        Ok(blob[range.start as usize..range.end as usize].to_vec())
    }

    fn delete(&self, reference: &str) -> Result<bool, StorageError> {
        validate_reference(reference)?;
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(blobs.remove(reference).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_delete() {
        let store = MemoryBlobStore::new();
        let reference = store.put("acme", "a.csv", b"0123456789").unwrap();
        assert_eq!(store.read_range(&reference, 2..5).unwrap(), b"234");
        assert!(store.contains(&reference));
        assert!(store.delete(&reference).unwrap());
        assert!(!store.delete(&reference).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_errors() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.read_range("acme/none.csv", 0..1),
            Err(StorageError::NotFound(_))
        ));
        let reference = store.put("acme", "a.csv", b"abc").unwrap();
        assert!(matches!(
            store.read_range(&reference, 0..4),
            Err(StorageError::RangeOutOfBounds { .. })
        ));
        assert!(store.put("acme", "a.csv", b"again").is_err());
    }

    #[test]
    fn test_clones_share_contents() {
        let store = MemoryBlobStore::new();
        let clone = store.clone();
        store.put("acme", "a.csv", b"abc").unwrap();
        assert_eq!(clone.len(), 1);
    }
}
