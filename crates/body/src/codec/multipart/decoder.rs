//! Streaming decoder for `multipart/form-data` bodies as described in
//! [RFC 7578](https://tools.ietf.org/html/rfc7578) and
//! [RFC 2046 Section 5.1](https://tools.ietf.org/html/rfc2046#section-5.1).
//!
//! The decoder never needs the whole body: part content is released as soon
//! as it can no longer be the start of a delimiter, so memory stays bounded by
//! the boundary length plus whatever the transport hands over in one read.

use bytes::{Buf, BytesMut};
use memchr::memmem::Finder;
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{MultipartItem, PartHeader};
use crate::utils::ensure;
use crate::BodyError;
use MultipartState::*;

/// Largest header block accepted for a single part.
const MAX_PART_HEADER_SIZE: usize = 8 * 1024;
/// Maximum number of headers in a single part.
const MAX_PART_HEADERS: usize = 32;

/// A decoder splitting a multipart body into parts.
///
/// Every part produces one [`MultipartItem::PartStart`], zero or more
/// [`MultipartItem::PartChunk`] and one [`MultipartItem::PartEnd`]; the
/// terminal boundary produces [`MultipartItem::Finished`].
#[derive(Debug)]
pub struct MultipartDecoder {
    state: MultipartState,
    /// `\r\n--boundary`, the delimiter closing a part.
    delimiter: Vec<u8>,
    finder: Finder<'static>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultipartState {
    /// Skip the preamble up to the first `--boundary`
    SeekBoundary,
    /// Read what follows a boundary: `\r\n` for a new part, `--` for the end
    BoundaryTail,
    /// Read the part header block
    ReadHeaders,
    /// Stream the part content
    ReadBody,
    /// Terminal boundary seen, the epilogue is discarded
    End,
}

impl MultipartDecoder {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        let finder = Finder::new(&delimiter).into_owned();
        Self { state: SeekBoundary, delimiter, finder }
    }

    /// Returns true once the terminal boundary has been decoded.
    pub fn is_finished(&self) -> bool {
        self.state == End
    }

    fn dash_boundary(&self) -> &[u8] {
        &self.delimiter[2..]
    }

    fn seek_boundary(&mut self, src: &mut BytesMut) -> Option<()> {
        let dash_boundary_len = self.delimiter.len() - 2;
        match memchr::memmem::find(src, self.dash_boundary()) {
            Some(index) => {
                src.advance(index + dash_boundary_len);
                self.state = BoundaryTail;
                Some(())
            }
            None => {
                // keep what may be the beginning of a split boundary
                let keep = dash_boundary_len.saturating_sub(1);
                if src.len() > keep {
                    src.advance(src.len() - keep);
                }
                None
            }
        }
    }

    fn boundary_tail(&mut self, src: &mut BytesMut) -> Result<Option<MultipartItem>, BodyError> {
        if src.len() < 2 {
            return Ok(None);
        }

        if &src[..2] == b"--" {
            src.advance(2);
            self.state = End;
            return Ok(Some(MultipartItem::Finished));
        }

        // transport padding is allowed between the boundary and its CRLF
        let Some(lf) = memchr::memchr(b'\n', src) else {
            ensure!(
                src.iter().all(|b| matches!(b, b' ' | b'\t' | b'\r')),
                BodyError::malformed("invalid characters after multipart boundary")
            );
            return Ok(None);
        };

        ensure!(
            lf >= 1 && src[lf - 1] == b'\r' && src[..lf - 1].iter().all(|b| matches!(b, b' ' | b'\t')),
            BodyError::malformed("invalid characters after multipart boundary")
        );

        src.advance(lf + 1);
        self.state = ReadHeaders;
        Ok(None)
    }

    fn read_headers(&mut self, src: &mut BytesMut) -> Result<Option<MultipartItem>, BodyError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];

        let (consumed, part_header) = match httparse::parse_headers(&src[..], &mut headers) {
            Ok(httparse::Status::Complete((consumed, parsed))) => {
                ensure!(consumed <= MAX_PART_HEADER_SIZE, BodyError::malformed("multipart part header too large"));
                (consumed, PartHeader::from_headers(parsed)?)
            }
            Ok(httparse::Status::Partial) => {
                ensure!(src.len() <= MAX_PART_HEADER_SIZE, BodyError::malformed("multipart part header too large"));
                return Ok(None);
            }
            Err(e) => return Err(BodyError::malformed(format!("invalid multipart part header: {e}"))),
        };

        src.advance(consumed);
        trace!(name = part_header.name(), file = ?part_header.file_name(), "decoded multipart part header");

        self.state = ReadBody;
        Ok(Some(MultipartItem::PartStart(part_header)))
    }

    fn read_body(&mut self, src: &mut BytesMut) -> Option<MultipartItem> {
        if let Some(index) = self.finder.find(src) {
            if index > 0 {
                return Some(MultipartItem::PartChunk(src.split_to(index).freeze()));
            }

            src.advance(self.delimiter.len());
            self.state = BoundaryTail;
            return Some(MultipartItem::PartEnd);
        }

        let safe = self.partial_delimiter_start(src);
        if safe == 0 {
            return None;
        }

        Some(MultipartItem::PartChunk(src.split_to(safe).freeze()))
    }

    /// Position from which the tail of `src` could still grow into a delimiter.
    fn partial_delimiter_start(&self, src: &[u8]) -> usize {
        let window_start = src.len().saturating_sub(self.delimiter.len() - 1);
        memchr::memchr_iter(b'\r', &src[window_start..])
            .map(|offset| window_start + offset)
            .find(|&start| self.delimiter.starts_with(&src[start..]))
            .unwrap_or(src.len())
    }
}

impl Decoder for MultipartDecoder {
    type Item = MultipartItem;
    type Error = BodyError;

    /// Decodes the next item of the multipart body.
    ///
    /// # Returns
    /// - `Ok(Some(item))` when a part boundary, part content or the end is decoded
    /// - `Ok(None)` when more data is needed
    /// - `Err(BodyError::MalformedBody)` if the body violates the multipart format
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                SeekBoundary => {
                    if self.seek_boundary(src).is_none() {
                        return Ok(None);
                    }
                }
                BoundaryTail => {
                    let item = self.boundary_tail(src)?;
                    if item.is_some() || self.state == BoundaryTail {
                        return Ok(item);
                    }
                }
                ReadHeaders => return self.read_headers(src),
                ReadBody => return Ok(self.read_body(src)),
                End => {
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }

    /// Decodes what is left once the transport signalled end of stream.
    ///
    /// Ending anywhere but after the terminal boundary is a malformed body,
    /// except right after a complete delimiter line with no part started.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        match self.state {
            End => Ok(None),
            ReadHeaders if src.is_empty() => {
                self.state = End;
                Ok(Some(MultipartItem::Finished))
            }
            _ => Err(BodyError::malformed("premature end of multipart body")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use indoc::indoc;

    const BOUNDARY: &str = "dLV9Wyq26L_-JQxk6ferf-RT153LhOO";

    fn crlf(s: &str) -> String {
        s.replace('\n', "\r\n")
    }

    /// Feeds `input` in pieces of `step` bytes and collects every item.
    fn decode_all(input: &[u8], step: usize) -> Result<Vec<MultipartItem>, BodyError> {
        let mut decoder = MultipartDecoder::new(BOUNDARY);
        let mut buffer = BytesMut::new();
        let mut items = Vec::new();

        for piece in input.chunks(step) {
            buffer.extend_from_slice(piece);
            while let Some(item) = decoder.decode(&mut buffer)? {
                items.push(item);
            }
        }

        while let Some(item) = decoder.decode_eof(&mut buffer)? {
            items.push(item);
            if decoder.is_finished() {
                break;
            }
        }

        Ok(items)
    }

    /// Joins the chunks of every part, keyed by part name.
    fn parts(items: Vec<MultipartItem>) -> Vec<(PartHeader, Vec<u8>)> {
        let mut parts: Vec<(PartHeader, Vec<u8>)> = Vec::new();
        for item in items {
            match item {
                MultipartItem::PartStart(header) => parts.push((header, Vec::new())),
                MultipartItem::PartChunk(bytes) => parts.last_mut().unwrap().1.extend_from_slice(&bytes),
                MultipartItem::PartEnd | MultipartItem::Finished => {}
            }
        }
        parts
    }

    fn form_body() -> String {
        crlf(indoc! {r#"
            preamble is ignored
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO
            Content-Disposition: form-data; name="attr1"

            Tim
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO
            Content-Disposition: form-data; name="file"; filename="a.txt"
            Content-Type: text/plain

            line one
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOX not a delimiter
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO--
            epilogue is ignored
        "#})
    }

    #[test]
    fn decode_form_and_file() {
        for step in [1, 2, 7, 64, 4096] {
            let items = decode_all(form_body().as_bytes(), step).unwrap();
            assert!(matches!(items.last(), Some(MultipartItem::Finished)), "step {step}");

            let parts = parts(items);
            assert_eq!(parts.len(), 2);

            assert_eq!(parts[0].0.name(), "attr1");
            assert_eq!(parts[0].1, b"Tim");

            assert_eq!(parts[1].0.file_name(), Some("a.txt"));
            assert_eq!(parts[1].1, b"line one\r\n--dLV9Wyq26L_-JQxk6ferf-RT153LhOX not a delimiter");
        }
    }

    #[test]
    fn binary_content_is_untouched() {
        let data: Vec<u8> = (0..7990u32).map(|i| (i % 251) as u8).chain([b'\r', b'\n', b'-', b'-']).collect();

        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"f\"; filename=\"f.bin\"\r\n\r\n");
        body.extend_from_slice(&data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        for step in [3, 1000, body.len()] {
            let parts = parts(decode_all(&body, step).unwrap());
            assert_eq!(parts.len(), 1);
            assert_eq!(parts[0].1, data);
        }
    }

    #[test]
    fn empty_part() {
        let body = crlf(indoc! {r#"
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO
            Content-Disposition: form-data; name="f"; filename="empty"


            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO--
        "#});
        let parts = parts(decode_all(body.as_bytes(), 5).unwrap());
        assert_eq!(parts.len(), 1);
        assert!(parts[0].1.is_empty());
    }

    #[test]
    fn premature_end() {
        let body = crlf(indoc! {r#"
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO
            Content-Disposition: form-data; name="f"; filename="a"

            partial content
        "#});

        let result = decode_all(body.as_bytes(), 16);
        assert!(matches!(result, Err(BodyError::MalformedBody { .. })));
        assert!(matches!(decode_all(b"", 1), Err(BodyError::MalformedBody { .. })));
    }

    #[test]
    fn end_after_delimiter_line_is_accepted() {
        let body = crlf(indoc! {r#"
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO
            Content-Disposition: form-data; name="a"

            1
            --dLV9Wyq26L_-JQxk6ferf-RT153LhOO
        "#});

        let items = decode_all(body.as_bytes(), 10).unwrap();
        assert!(matches!(items.last(), Some(MultipartItem::Finished)));
        assert_eq!(parts(items).len(), 1);
    }

    #[test]
    fn garbage_after_boundary() {
        let body = format!("--{BOUNDARY}garbage\r\n");
        assert!(matches!(decode_all(body.as_bytes(), 100), Err(BodyError::MalformedBody { .. })));
    }

    #[test]
    fn oversized_part_header() {
        let mut body = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a\"\r\nX-Pad: ");
        body.push_str(&"x".repeat(MAX_PART_HEADER_SIZE));
        assert!(matches!(decode_all(body.as_bytes(), 512), Err(BodyError::MalformedBody { .. })));
    }

    #[test]
    fn chunks_are_released_before_the_delimiter_arrives() {
        let mut decoder = MultipartDecoder::new(BOUNDARY);
        let mut buffer = BytesMut::from(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x\"\r\n\r\nhello world\r\n--dLV").as_str(),
        );

        assert!(matches!(decoder.decode(&mut buffer).unwrap(), Some(MultipartItem::PartStart(_))));
        match decoder.decode(&mut buffer).unwrap() {
            Some(MultipartItem::PartChunk(bytes)) => assert_eq!(bytes, Bytes::from_static(b"hello world")),
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], b"\r\n--dLV");
    }
}
