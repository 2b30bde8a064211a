//! Multipart form decoding.
//!
//! [`MultipartDecoder`] turns a `multipart/form-data` byte stream into a
//! sequence of [`MultipartItem`]s. It only understands framing and part
//! headers; deciding whether a part becomes a form attribute or a file upload
//! is left to the caller.

mod decoder;
mod part_header;

use bytes::Bytes;
use mime::Mime;

pub use decoder::MultipartDecoder;
pub use part_header::PartHeader;

use crate::utils::ensure;
use crate::BodyError;

/// RFC 2046 caps boundaries at 70 characters.
const MAX_BOUNDARY_LENGTH: usize = 70;

/// An item produced by [`MultipartDecoder`].
#[derive(Debug, PartialEq, Eq)]
pub enum MultipartItem {
    /// A new part begins.
    PartStart(PartHeader),
    /// Content of the current part, never empty.
    PartChunk(Bytes),
    /// The current part is complete.
    PartEnd,
    /// The terminal boundary was reached.
    Finished,
}

/// Extracts the boundary from a `multipart/*` content type.
///
/// The media type and the parameter name are matched case-insensitively and
/// surrounding quotes are removed by the mime parser.
pub fn parse_boundary(mime: &Mime) -> Result<String, BodyError> {
    ensure!(
        mime.type_().as_str().eq_ignore_ascii_case("multipart"),
        BodyError::malformed("content type is not multipart")
    );

    let boundary = mime
        .params()
        .find(|(name, _)| name.as_str().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.as_str().to_string())
        .ok_or_else(|| BodyError::malformed("multipart content type without boundary"))?;

    ensure!(!boundary.is_empty(), BodyError::malformed("empty multipart boundary"));
    ensure!(boundary.len() <= MAX_BOUNDARY_LENGTH, BodyError::malformed("multipart boundary too long"));

    Ok(boundary)
}
