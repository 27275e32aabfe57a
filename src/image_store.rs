//! Temporary storage for uploaded pictures waiting for their bordering parameters.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::Builder;

use crate::errors::StorageError;
use crate::session_store::UserKey;

/// Directory holding pending uploads, one file per open session
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a fresh file and return its path
    ///
    /// The file outlives this call; whoever keeps the path must hand it to [`Self::discard`].
    pub fn save(&self, user: UserKey, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let write_error = |source| StorageError::Write {
            dir: self.dir.clone(),
            source,
        };

        let mut temp_file = Builder::new()
            .prefix(&format!("borderify-{user}-"))
            .suffix(".img")
            .tempfile_in(&self.dir)
            .map_err(write_error)?;
        temp_file.as_file_mut().write_all(bytes).map_err(write_error)?;

        let (_, path) = temp_file.keep().map_err(|e| write_error(e.error))?;
        debug!("Stored {} bytes for user {} at {}", bytes.len(), user, path.display());
        Ok(path)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(path).await.map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Delete a pending file, returning whether something was removed
    ///
    /// A file that is already gone is not an error, and other failures are only logged.
    pub fn discard(&self, path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Temporary file cleaned up: {}", path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Temporary file already removed: {}", path.display());
                false
            }
            Err(e) => {
                warn!("Failed to clean up temporary file {}: {}", path.display(), e);
                false
            }
        }
    }
}
