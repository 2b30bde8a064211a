use std::io;
use std::path::PathBuf;

use http::StatusCode;
use thiserror::Error;

/// Every way request body ingestion can fail.
///
/// All variants abort ingestion; the backing files created for the request are
/// deleted before the error reaches the caller.
#[derive(Error, Debug)]
pub enum BodyError {
    #[error("request body exceed the limit {limit}")]
    PayloadTooLarge { limit: u64 },

    #[error("malformed body: {reason}")]
    MalformedBody { reason: String },

    #[error("body structure nesting exceed the max depth {max_depth}")]
    StructureTooDeep { max_depth: usize },

    #[error("uploads directory {path:?} unavailable: {source}")]
    UploadDirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("client aborted while sending body: {reason}")]
    ClientAborted { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl BodyError {
    pub fn payload_too_large(limit: u64) -> Self {
        Self::PayloadTooLarge { limit }
    }

    pub fn malformed<S: ToString>(str: S) -> Self {
        Self::MalformedBody { reason: str.to_string() }
    }

    pub fn structure_too_deep(max_depth: usize) -> Self {
        Self::StructureTooDeep { max_depth }
    }

    pub fn upload_directory_unavailable<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        Self::UploadDirectoryUnavailable { path: path.into(), source }
    }

    pub fn client_aborted<S: ToString>(str: S) -> Self {
        Self::ClientAborted { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The response status the surrounding server should answer with.
    ///
    /// `ClientAborted` still maps to a status for completeness, although the
    /// peer is gone by the time it surfaces.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BodyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::MalformedBody { .. } | BodyError::StructureTooDeep { .. } => StatusCode::BAD_REQUEST,
            BodyError::ClientAborted { .. } => StatusCode::BAD_REQUEST,
            BodyError::UploadDirectoryUnavailable { .. } | BodyError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client caused the failure and may retry with a different request.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
