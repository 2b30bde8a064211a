//! Request body ingestion for micro http services.
//!
//! This crate sits between the transport and application handlers. It reads a
//! request body frame by frame, enforces a size limit, decodes url-encoded and
//! multipart forms, persists uploaded files and makes sure those files never
//! outlive a failed, aborted or cancelled request.
//!
//! # Architecture
//!
//! - [`limit`]: byte counting against the configured ceiling
//! - [`form`]: `application/x-www-form-urlencoded` decoding
//! - [`codec`]: streaming `multipart/form-data` decoder
//! - [`upload`]: backing files of file parts and their cleanup
//! - [`accumulator`]: drives a body through the pieces above
//! - [`handler`]: wraps application handlers and maps failures to responses
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::Request;
//! use http_body_util::Full;
//! use micro_body::{BodyAccumulator, BodyConfig, BodyError};
//!
//! # async fn run() -> Result<(), BodyError> {
//! let config = Arc::new(BodyConfig::builder().body_limit(1024).build());
//!
//! let request = Request::post("/login?origin=web")
//!     .header("content-type", "application/x-www-form-urlencoded")
//!     .body(Full::new(Bytes::from_static(b"login=admin%40foo.bar&pass=admin")))
//!     .unwrap();
//! let (parts, body) = request.into_parts();
//!
//! let request_body = BodyAccumulator::new(config, &parts)?.ingest(body).await?;
//! assert_eq!(request_body.params().get("login"), Some("admin@foo.bar"));
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod charset;
pub mod codec;
pub mod config;
mod error;
pub mod form;
pub mod handler;
pub mod limit;
pub mod multimap;
mod request_body;
pub mod upload;
mod utils;

pub use accumulator::{BodyAccumulator, BodyKind};
pub use charset::Charset;
pub use config::{BodyConfig, BodyConfigBuilder};
pub use error::BodyError;
pub use multimap::{MultiMap, Params};
pub use request_body::RequestBody;
pub use upload::{FileUpload, UploadState};
