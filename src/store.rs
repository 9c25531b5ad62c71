//! Filesystem store for the most recent image of each page.
//!
//! Each page owns one file, `<output_path>.<format>`. Writes go to a sibling
//! temporary file that is renamed into place, so readers see either the old
//! or the new image, never a partial one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::io::AsyncReadExt;

use crate::config::PageConfig;
use crate::error::Error;

/// A stored image and its modification time.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub data: Vec<u8>,
    pub modified: SystemTime,
}

/// Output store rooted at the pages' configured output paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputStore;

impl OutputStore {
    /// Replace the stored image for `page`.
    pub async fn write(&self, page: &PageConfig, data: &[u8]) -> Result<(), Error> {
        let path = page.output_file();
        if let Some(dir) = parent_dir(&path) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::Io(format!("Failed to create {}: {}", dir.display(), e)))?;
        }

        let temp = temp_path(&path);
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| Error::Io(format!("Failed to write {}: {}", temp.display(), e)))?;

        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| Error::Io(format!("Failed to move image to {}: {}", path.display(), e)))?;

        tracing::debug!("Stored {} bytes at {}", data.len(), path.display());
        Ok(())
    }

    /// Read the stored image for `page`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing was ever stored.
    pub async fn read(&self, page: &PageConfig) -> Result<StoredImage, Error> {
        let path = page.output_file();
        let map_err = |e: std::io::Error| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(path.clone()),
            _ => Error::Io(format!("Failed to read {}: {}", path.display(), e)),
        };

        // One handle for both, a concurrent rename cannot mix two versions
        let mut file = tokio::fs::File::open(&path).await.map_err(map_err)?;
        let metadata = file.metadata().await.map_err(map_err)?;
        let modified = metadata.modified().map_err(map_err)?;

        let mut data = Vec::with_capacity(usize::try_from(metadata.len()).unwrap_or_default());
        file.read_to_end(&mut data).await.map_err(map_err)?;
        Ok(StoredImage { data, modified })
    }

    /// Remove the directory holding `page`'s output. Missing directories are fine.
    pub async fn clear(&self, page: &PageConfig) -> Result<(), Error> {
        let path = page.output_file();
        let Some(dir) = parent_dir(&path) else {
            return Ok(());
        };

        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                tracing::debug!("Removed {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!(
                "Failed to delete {}: {}",
                dir.display(),
                e
            ))),
        }
    }
}

/// Parent directory, `None` for bare file names.
fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|dir| !dir.as_os_str().is_empty())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
