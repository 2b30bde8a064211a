//! Backing storage for file parts.
//!
//! Each request gets its own [`UploadManager`]. File parts are written to
//! uniquely named files inside the configured uploads directory, which is
//! created the first time a request actually carries a file. The
//! [`UploadGuard`] tracking those files guarantees they are removed on every
//! path that must not leave them behind: failed ingestion, client disconnect,
//! cancellation and, when configured, the end of the request.

mod file_upload;
mod guard;
mod manager;

pub use file_upload::{FileUpload, UploadState};
pub use guard::UploadGuard;
pub use manager::{PartHandle, UploadManager};
