//! File naming and cleanup for accepted images

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{trace, warn};

/// Leading payload bytes sent as the preview when it cannot be re-encoded.
pub const RAW_PREVIEW_BYTES: usize = 50 * 1024;

/// `<query with spaces replaced by underscores>_<sequence>.<ext>`
pub fn file_name(query: &str, sequence_number: usize, extension: &str) -> String {
    format!("{}_{}.{}", query.replace(' ', "_"), sequence_number, extension)
}

/// Full destination path for an accepted image.
pub fn image_path(directory: &Path, query: &str, sequence_number: usize, extension: &str) -> PathBuf {
    directory.join(file_name(query, sequence_number, extension))
}

/// Removes a file written for a rejected candidate. A file that is already
/// gone is not an error.
pub async fn discard(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            trace!("Removed rejected file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("Failed to remove rejected file {}: {}", path.display(), e);
            Err(e)
        }
    }
}
