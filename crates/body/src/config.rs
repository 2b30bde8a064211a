//! Per-handler configuration of body ingestion.
//!
//! A [`BodyConfig`] is immutable once built and is shared by every request the
//! handler processes. It can be assembled with [`BodyConfig::builder`] or
//! deserialized as part of a larger configuration file; missing fields take the
//! defaults below.
//!
//! | option | default |
//! |---|---|
//! | `body_limit` | `-1` (unlimited) |
//! | `uploads_directory` | [`DEFAULT_UPLOADS_DIRECTORY`] |
//! | `merge_form_attributes` | `true` |
//! | `handle_file_uploads` | `true` |
//! | `delete_uploaded_files_on_end` | `false` |
//! | `preallocate_body_buffer` | `false` |
//! | `max_form_attribute_size` | [`DEFAULT_MAX_FORM_ATTRIBUTE_SIZE`] |

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::utils::limit_of;

/// Directory, relative to the working directory, receiving uploaded files.
pub const DEFAULT_UPLOADS_DIRECTORY: &str = "file-uploads";

/// Largest decoded form attribute value accepted, in bytes.
pub const DEFAULT_MAX_FORM_ATTRIBUTE_SIZE: i64 = 8192;

/// Upper bound on the capacity reserved up front from a declared content-length.
const MAX_PREALLOCATE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    body_limit: i64,
    uploads_directory: PathBuf,
    merge_form_attributes: bool,
    handle_file_uploads: bool,
    delete_uploaded_files_on_end: bool,
    preallocate_body_buffer: bool,
    max_form_attribute_size: i64,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            body_limit: -1,
            uploads_directory: PathBuf::from(DEFAULT_UPLOADS_DIRECTORY),
            merge_form_attributes: true,
            handle_file_uploads: true,
            delete_uploaded_files_on_end: false,
            preallocate_body_buffer: false,
            max_form_attribute_size: DEFAULT_MAX_FORM_ATTRIBUTE_SIZE,
        }
    }
}

impl BodyConfig {
    pub fn builder() -> BodyConfigBuilder {
        BodyConfigBuilder::new()
    }

    /// The configured limit, `-1` meaning unlimited.
    pub fn body_limit(&self) -> i64 {
        self.body_limit
    }

    /// The limit as an unsigned ceiling, `None` when unlimited.
    pub fn max_body_size(&self) -> Option<u64> {
        limit_of(self.body_limit)
    }

    pub fn uploads_directory(&self) -> &Path {
        &self.uploads_directory
    }

    pub fn merge_form_attributes(&self) -> bool {
        self.merge_form_attributes
    }

    pub fn handle_file_uploads(&self) -> bool {
        self.handle_file_uploads
    }

    pub fn delete_uploaded_files_on_end(&self) -> bool {
        self.delete_uploaded_files_on_end
    }

    pub fn preallocate_body_buffer(&self) -> bool {
        self.preallocate_body_buffer
    }

    pub fn max_form_attribute_size(&self) -> Option<u64> {
        limit_of(self.max_form_attribute_size)
    }

    /// Initial raw buffer capacity for a body declaring `declared` bytes.
    pub(crate) fn initial_capacity(&self, declared: Option<u64>) -> usize {
        if !self.preallocate_body_buffer {
            return 0;
        }

        let declared = declared.unwrap_or(0);
        let bounded = match self.max_body_size() {
            Some(limit) => declared.min(limit),
            None => declared,
        };

        usize::try_from(bounded).map_or(MAX_PREALLOCATE_SIZE, |size| size.min(MAX_PREALLOCATE_SIZE))
    }
}

#[derive(Debug)]
pub struct BodyConfigBuilder {
    inner: BodyConfig,
}

impl BodyConfigBuilder {
    fn new() -> Self {
        Self { inner: BodyConfig::default() }
    }

    /// Maximum body size in bytes, any negative value disables the limit.
    pub fn body_limit(mut self, body_limit: i64) -> Self {
        self.inner.body_limit = body_limit;
        self
    }

    pub fn uploads_directory<P: Into<PathBuf>>(mut self, uploads_directory: P) -> Self {
        self.inner.uploads_directory = uploads_directory.into();
        self
    }

    pub fn merge_form_attributes(mut self, merge_form_attributes: bool) -> Self {
        self.inner.merge_form_attributes = merge_form_attributes;
        self
    }

    pub fn handle_file_uploads(mut self, handle_file_uploads: bool) -> Self {
        self.inner.handle_file_uploads = handle_file_uploads;
        self
    }

    pub fn delete_uploaded_files_on_end(mut self, delete_uploaded_files_on_end: bool) -> Self {
        self.inner.delete_uploaded_files_on_end = delete_uploaded_files_on_end;
        self
    }

    pub fn preallocate_body_buffer(mut self, preallocate_body_buffer: bool) -> Self {
        self.inner.preallocate_body_buffer = preallocate_body_buffer;
        self
    }

    pub fn max_form_attribute_size(mut self, max_form_attribute_size: i64) -> Self {
        self.inner.max_form_attribute_size = max_form_attribute_size;
        self
    }

    pub fn build(self) -> BodyConfig {
        self.inner
    }
}
