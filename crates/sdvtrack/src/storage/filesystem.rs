use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::{check_range, make_reference, validate_reference, BlobStore};
use crate::error::StorageError;

/// Stores blobs as files below a root directory.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, reference: &str) -> Result<PathBuf, StorageError> {
        validate_reference(reference)?;
        Ok(self.root.join(reference))
    }

    fn ensure_directory(&self, path: &Path, reference: &str) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::Write {
                reference: reference.to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, namespace: &str, name: &str, content: &[u8]) -> Result<String, StorageError> {
        let reference = make_reference(namespace, name)?;
        let path = self.path_of(&reference)?;
        if let Some(parent) = path.parent() {
            self.ensure_directory(parent, &reference)?;
        }

        // create_new: blobs are write-once.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::Write {
                reference: reference.clone(),
                source: e,
            })?;
        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::Write {
                reference: reference.clone(),
                source: e,
            })?;

        log::debug!("Stored blob {} ({} bytes)", reference, content.len());
        Ok(reference)
    }

    fn read_range(&self, reference: &str, range: Range<u64>) -> Result<Vec<u8>, StorageError> {
        let path = self.path_of(reference)?;
        let read_err = |e: std::io::Error| StorageError::Read {
            reference: reference.to_string(),
            source: e,
        };

        let mut file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(reference.to_string()));
            }
            Err(e) => return Err(read_err(e)),
        };
        let len = file.metadata().map_err(read_err)?.len();
        check_range(reference, &range, len)?;

        file.seek(SeekFrom::Start(range.start)).map_err(read_err)?;
        let mut buf = Vec::with_capacity((range.end - range.start) as usize);
        file.take(range.end - range.start)
            .read_to_end(&mut buf)
            .map_err(read_err)?;
        Ok(buf)
    }

    fn delete(&self, reference: &str) -> Result<bool, StorageError> {
        let path = self.path_of(reference)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Delete {
                reference: reference.to_string(),
                source: e,
            }),
        }
    }
}
