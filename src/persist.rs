//! Durable blob storage for the hub's persisted state.
//!
//! The hub persists exactly one document (the account collection) but the
//! port is a generic named-blob get/set so the store logic stays independent
//! of file layout. [`FileStore`] keeps one file per blob under the configured
//! state directory and replaces documents atomically: write to a temp file,
//! then rename over the previous one, so a crash mid-write leaves the prior
//! valid document intact.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from the persistence layer. Never fatal to the hub — callers log
/// a warning and keep the in-memory state authoritative.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("document encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Named-blob persistence port.
pub trait BlobStore: Send + 'static {
    /// Read a blob. `Ok(None)` means the blob has never been written.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, PersistError>;

    /// Replace a blob wholesale.
    fn set(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError>;
}

/// File-per-blob store rooted at a state directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BlobStore for FileStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, PersistError> {
        match fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.tmp", name));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.dir.join(name))?;
        Ok(())
    }
}
