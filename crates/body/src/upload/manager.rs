use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};
use uuid::Uuid;

use super::file_upload::{BackingFile, FileUpload};
use super::guard::UploadGuard;
use crate::BodyError;
use crate::codec::PartHeader;

/// Creates, fills and deletes the backing files of one request.
///
/// Every file created here is tracked by an [`UploadGuard`]; dropping the
/// manager before [`UploadManager::into_guard`] deletes them all.
#[derive(Debug)]
pub struct UploadManager {
    directory: PathBuf,
    directory_ready: bool,
    guard: UploadGuard,
}

/// A file part being written.
#[derive(Debug)]
pub struct PartHandle {
    header: PartHeader,
    file: File,
    backing: BackingFile,
    size: u64,
}

impl PartHandle {
    pub fn header(&self) -> &PartHeader {
        &self.header
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.backing.path()
    }
}

impl UploadManager {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self { directory: directory.into(), directory_ready: false, guard: UploadGuard::new() }
    }

    pub fn uploads_directory(&self) -> &Path {
        &self.directory
    }

    /// Number of backing files created for this request, deleted ones included.
    pub fn files_created(&self) -> usize {
        self.guard.len()
    }

    /// Opens a new backing file for the part described by `header`.
    ///
    /// The uploads directory is created on the first call.
    pub async fn begin_part(&mut self, header: &PartHeader) -> Result<PartHandle, BodyError> {
        self.ensure_directory().await?;

        let path = self.directory.join(Uuid::new_v4().to_string());
        let file = OpenOptions::new().write(true).create_new(true).open(&path).await?;

        let backing = BackingFile::new(path);
        self.guard.track(backing.clone());

        debug!(name = header.name(), file_name = ?header.file_name(), path = ?backing.path(), "begin file upload");
        Ok(PartHandle { header: header.clone(), file, backing, size: 0 })
    }

    /// Appends `bytes` to the part, waiting until the write is accepted.
    pub async fn write(&self, handle: &mut PartHandle, bytes: &Bytes) -> Result<(), BodyError> {
        handle.file.write_all(bytes).await?;
        handle.size += bytes.len() as u64;
        Ok(())
    }

    /// Flushes and closes the part, producing its upload record.
    pub async fn end_part(&mut self, handle: PartHandle) -> Result<FileUpload, BodyError> {
        let PartHandle { header, mut file, backing, size } = handle;
        file.flush().await?;
        drop(file);

        backing.complete();
        debug!(name = header.name(), size = size, path = ?backing.path(), "file upload complete");
        Ok(FileUpload::new(header, size, backing))
    }

    /// Closes and removes a part that will not be completed.
    pub async fn abort_part(&mut self, handle: PartHandle) {
        let PartHandle { file, backing, .. } = handle;
        drop(file);

        if let Err(e) = backing.delete().await {
            error!(path = ?backing.path(), cause = %e, "failed to delete aborted upload");
        }
    }

    /// Deletes every backing file not deleted yet, returns how many were removed.
    pub async fn delete_all(&mut self) -> usize {
        self.guard.delete_all().await
    }

    /// Hands the tracked files over to a guard outliving the manager.
    pub fn into_guard(self) -> UploadGuard {
        self.guard
    }

    async fn ensure_directory(&mut self) -> Result<(), BodyError> {
        if self.directory_ready {
            return Ok(());
        }

        // create_dir_all succeeds when a concurrent request created it first
        tokio::fs::create_dir_all(&self.directory).await.map_err(|e| {
            error!(path = ?self.directory, cause = %e, "failed to create uploads directory");
            BodyError::upload_directory_unavailable(&self.directory, e)
        })?;

        debug!(path = ?self.directory, "uploads directory ready");
        self.directory_ready = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadState;

    fn file_header(name: &str) -> PartHeader {
        let disposition = format!("form-data; name=\"{name}\"; filename=\"{name}.dat\"");
        PartHeader::from_headers(&[httparse::Header { name: "Content-Disposition", value: disposition.as_bytes() }])
            .unwrap()
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn write_and_complete() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("uploads");
        let mut manager = UploadManager::new(&dir);
        assert!(!dir.exists());

        let mut handle = manager.begin_part(&file_header("a")).await.unwrap();
        assert!(dir.exists());
        manager.write(&mut handle, &Bytes::from_static(b"hello ")).await.unwrap();
        manager.write(&mut handle, &Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(handle.size(), 11);

        let upload = manager.end_part(handle).await.unwrap();
        assert_eq!(upload.size(), 11);
        assert_eq!(upload.name(), "a");
        assert_eq!(upload.file_name(), "a.dat");
        assert_eq!(upload.state(), UploadState::Complete);
        assert!(upload.uploaded_file_name().starts_with(&dir));
        assert_eq!(std::fs::read(upload.uploaded_file_name()).unwrap(), b"hello world");

        assert_eq!(manager.delete_all().await, 1);
        assert!(upload.is_deleted());
        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn empty_part_creates_empty_file() {
        let root = tempfile::tempdir().unwrap();
        let mut manager = UploadManager::new(root.path());

        let handle = manager.begin_part(&file_header("empty")).await.unwrap();
        let upload = manager.end_part(handle).await.unwrap();

        assert_eq!(upload.size(), 0);
        assert_eq!(std::fs::metadata(upload.uploaded_file_name()).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unique_file_names() {
        let root = tempfile::tempdir().unwrap();
        let mut manager = UploadManager::new(root.path());

        let first = manager.begin_part(&file_header("a")).await.unwrap();
        let second = manager.begin_part(&file_header("a")).await.unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(manager.files_created(), 2);
    }

    #[tokio::test]
    async fn abort_removes_partial_file() {
        let root = tempfile::tempdir().unwrap();
        let mut manager = UploadManager::new(root.path());

        let mut handle = manager.begin_part(&file_header("a")).await.unwrap();
        manager.write(&mut handle, &Bytes::from_static(b"partial")).await.unwrap();
        manager.abort_part(handle).await;

        assert_eq!(file_count(root.path()), 0);
        // already removed, nothing left for the bulk delete
        assert_eq!(manager.delete_all().await, 0);
    }

    #[tokio::test]
    async fn handler_delete_then_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let mut manager = UploadManager::new(root.path());

        let handle = manager.begin_part(&file_header("a")).await.unwrap();
        let upload = manager.end_part(handle).await.unwrap();

        upload.delete().await.unwrap();
        upload.delete().await.unwrap();
        assert_eq!(manager.delete_all().await, 0);
        assert_eq!(file_count(root.path()), 0);
    }

    #[tokio::test]
    async fn unavailable_directory() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut manager = UploadManager::new(blocker.join("uploads"));
        let result = manager.begin_part(&file_header("a")).await;
        assert!(matches!(result, Err(BodyError::UploadDirectoryUnavailable { .. })));
    }
}
