use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, error};

use crate::BodyError;
use crate::charset::Charset;
use crate::codec::PartHeader;

/// Lifecycle of a backing file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum UploadState {
    Writing = 0,
    Complete = 1,
    Deleted = 2,
}

impl UploadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => UploadState::Writing,
            1 => UploadState::Complete,
            _ => UploadState::Deleted,
        }
    }
}

/// A file on disk whose state is shared by every holder.
///
/// Whoever first moves the state to [`UploadState::Deleted`] removes the file,
/// so concurrent or repeated deletes remove it once.
#[derive(Debug, Clone)]
pub(crate) struct BackingFile {
    path: Arc<PathBuf>,
    state: Arc<AtomicU8>,
}

impl BackingFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Arc::new(path), state: Arc::new(AtomicU8::new(UploadState::Writing as u8)) }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn state(&self) -> UploadState {
        UploadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn complete(&self) {
        // a file deleted while still being written stays deleted
        let _ = self.state.compare_exchange(
            UploadState::Writing as u8,
            UploadState::Complete as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Claims the deletion, returning false when someone else already did.
    fn claim_delete(&self) -> bool {
        self.state.swap(UploadState::Deleted as u8, Ordering::AcqRel) != UploadState::Deleted as u8
    }

    /// Deletes the file, returns whether this call removed it.
    pub(crate) async fn delete(&self) -> io::Result<bool> {
        if !self.claim_delete() {
            return Ok(false);
        }

        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => {
                debug!(path = ?self.path(), "deleted uploaded file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Blocking variant of [`BackingFile::delete`] for use outside of async code.
    pub(crate) fn delete_blocking(&self) {
        if !self.claim_delete() {
            return;
        }

        match std::fs::remove_file(self.path()) {
            Ok(()) => debug!(path = ?self.path(), "deleted uploaded file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(path = ?self.path(), cause = %e, "failed to delete uploaded file"),
        }
    }
}

/// A file part persisted to the uploads directory.
///
/// Clones share the backing file state: deleting through any clone is seen by
/// all the others and by end of request cleanup.
#[derive(Debug, Clone)]
pub struct FileUpload {
    header: PartHeader,
    size: u64,
    backing: BackingFile,
}

impl FileUpload {
    pub(crate) fn new(header: PartHeader, size: u64, backing: BackingFile) -> Self {
        Self { header, size, backing }
    }

    /// The form field name of the part.
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// The file name declared by the client.
    pub fn file_name(&self) -> &str {
        self.header.file_name().unwrap_or_default()
    }

    pub fn content_type(&self) -> &str {
        self.header.content_type()
    }

    pub fn content_transfer_encoding(&self) -> &str {
        self.header.content_transfer_encoding()
    }

    pub fn charset(&self) -> Option<Charset> {
        self.header.charset()
    }

    /// Number of bytes written to the backing file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Location of the backing file inside the uploads directory.
    pub fn uploaded_file_name(&self) -> &Path {
        self.backing.path()
    }

    pub fn state(&self) -> UploadState {
        self.backing.state()
    }

    pub fn is_deleted(&self) -> bool {
        self.state() == UploadState::Deleted
    }

    /// Deletes the backing file.
    ///
    /// Deleting an upload that is already gone, through this record, a clone
    /// or request cleanup, is not an error.
    pub async fn delete(&self) -> Result<(), BodyError> {
        self.backing.delete().await?;
        Ok(())
    }

    pub(crate) fn backing(&self) -> &BackingFile {
        &self.backing
    }
}
