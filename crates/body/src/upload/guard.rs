use tracing::{error, warn};

use super::file_upload::{BackingFile, FileUpload, UploadState};

/// Owns backing files until they are explicitly released.
///
/// [`UploadGuard::release`] is the normal way out. A guard dropped while still
/// armed, for instance because the future ingesting the request was
/// cancelled, deletes every file it tracks: on the blocking pool when a tokio
/// runtime is available, inline otherwise.
#[derive(Debug)]
pub struct UploadGuard {
    files: Vec<BackingFile>,
    armed: bool,
}

impl Default for UploadGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadGuard {
    pub fn new() -> Self {
        Self { files: Vec::new(), armed: true }
    }

    /// Tracks the backing files of already completed uploads.
    pub fn adopt(uploads: &[FileUpload]) -> Self {
        Self { files: uploads.iter().map(|upload| upload.backing().clone()).collect(), armed: true }
    }

    pub(crate) fn track(&mut self, file: BackingFile) {
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Deletes every tracked file not deleted yet, returns how many were removed.
    pub async fn delete_all(&mut self) -> usize {
        let mut deleted = 0;
        for file in &self.files {
            match file.delete().await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => error!(path = ?file.path(), cause = %e, "failed to delete uploaded file"),
            }
        }
        deleted
    }

    /// Releases the guard, deleting the tracked files first when `delete` is set.
    pub async fn release(mut self, delete: bool) -> usize {
        let deleted = if delete { self.delete_all().await } else { 0 };
        self.armed = false;
        deleted
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let pending: Vec<BackingFile> =
            self.files.drain(..).filter(|file| file.state() != UploadState::Deleted).collect();
        if pending.is_empty() {
            return;
        }

        warn!(files = pending.len(), "upload guard dropped before release, deleting uploaded files");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || pending.iter().for_each(BackingFile::delete_blocking));
            }
            Err(_) => pending.iter().for_each(BackingFile::delete_blocking),
        }
    }
}
