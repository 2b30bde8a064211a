//! Streaming codecs for request bodies.
//!
//! Codecs here implement [`tokio_util::codec::Decoder`] so they can be driven
//! either by a `FramedRead` over an `AsyncRead` or, as the accumulator does, by
//! feeding body frames into a `BytesMut` and polling the decoder directly.

pub mod multipart;

pub use multipart::{MultipartDecoder, MultipartItem, PartHeader, parse_boundary};
