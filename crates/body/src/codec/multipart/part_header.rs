//! Parsing of the header block that opens every multipart part.
//!
//! Only `Content-Disposition`, `Content-Type` and `Content-Transfer-Encoding`
//! are interpreted; other part headers are ignored. File names are taken from
//! the RFC 5987 `filename*` parameter when present, falling back to the plain
//! `filename` parameter.

use std::str::FromStr;

use mime::Mime;
use percent_encoding::percent_decode;

use crate::charset::Charset;
use crate::utils::ensure;
use crate::BodyError;

const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";
const DEFAULT_ATTRIBUTE_CONTENT_TYPE: &str = "text/plain";
const DEFAULT_TRANSFER_ENCODING: &str = "7bit";

/// Metadata of one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeader {
    name: String,
    file_name: Option<String>,
    content_type: String,
    content_transfer_encoding: String,
    charset: Option<Charset>,
}

impl PartHeader {
    /// Builds the metadata from the raw headers of a part.
    pub(crate) fn from_headers(headers: &[httparse::Header<'_>]) -> Result<Self, BodyError> {
        let mut disposition = None;
        let mut content_type = None;
        let mut transfer_encoding = None;

        for header in headers {
            let value = String::from_utf8_lossy(header.value);
            if header.name.eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value.into_owned());
            } else if header.name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            } else if header.name.eq_ignore_ascii_case("content-transfer-encoding") {
                transfer_encoding = Some(value.trim().to_ascii_lowercase());
            }
        }

        let disposition = disposition.ok_or_else(|| BodyError::malformed("multipart part without content-disposition"))?;
        let (name, file_name) = parse_content_disposition(&disposition)?;

        let mime = content_type.as_deref().and_then(|s| Mime::from_str(s).ok());
        let charset = mime
            .as_ref()
            .and_then(|m| m.params().find(|(k, _)| k.as_str().eq_ignore_ascii_case("charset")))
            .and_then(|(_, v)| Charset::from_label(v.as_str()));

        let content_type = match (mime, content_type) {
            (Some(mime), _) => mime.essence_str().to_string(),
            (None, Some(raw)) => raw,
            (None, None) if file_name.is_some() => DEFAULT_FILE_CONTENT_TYPE.to_string(),
            (None, None) => DEFAULT_ATTRIBUTE_CONTENT_TYPE.to_string(),
        };

        Ok(Self {
            name,
            file_name,
            content_type,
            content_transfer_encoding: transfer_encoding.unwrap_or_else(|| DEFAULT_TRANSFER_ENCODING.to_string()),
            charset,
        })
    }

    /// The form field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client side file name, present only for file parts.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_transfer_encoding(&self) -> &str {
        &self.content_transfer_encoding
    }

    pub fn charset(&self) -> Option<Charset> {
        self.charset
    }

    /// A part declaring a file name is a file upload, anything else is an attribute.
    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }
}

/// Extracts `name` and the effective file name from a `Content-Disposition` value.
fn parse_content_disposition(value: &str) -> Result<(String, Option<String>), BodyError> {
    let mut params = split_params(value).into_iter();
    // disposition type, normally `form-data`
    params.next();

    let mut name = None;
    let mut file_name = None;
    let mut extended_file_name = None;

    for param in params {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let raw = raw.trim();

        if key.eq_ignore_ascii_case("name") {
            name = Some(unquote(raw));
        } else if key.eq_ignore_ascii_case("filename") {
            let unquoted = unquote(raw);
            file_name = Some(percent_decode(unquoted.as_bytes()).decode_utf8_lossy().into_owned());
        } else if key.eq_ignore_ascii_case("filename*") {
            extended_file_name = decode_extended_value(&unquote(raw));
        }
    }

    let name = name.ok_or_else(|| BodyError::malformed("multipart part without name"))?;
    ensure!(!name.is_empty(), BodyError::malformed("multipart part with empty name"));

    Ok((name, extended_file_name.or(file_name)))
}

/// Splits on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (index, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(value[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    params.push(value[start..].trim());
    params
}

fn unquote(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return s.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Decodes an RFC 5987 `charset'language'value-chars` extended value.
fn decode_extended_value(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let charset = Charset::from_label(pieces.next()?)?;
    let _language = pieces.next()?;
    let encoded = pieces.next()?;

    let bytes: Vec<u8> = percent_decode(encoded.as_bytes()).collect();
    Some(charset.decode(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(name: &'a str, value: &'a str) -> httparse::Header<'a> {
        httparse::Header { name, value: value.as_bytes() }
    }

    #[test]
    fn attribute_part() {
        let part = PartHeader::from_headers(&[header("Content-Disposition", "form-data; name=\"attr1\"")]).unwrap();
        assert_eq!(part.name(), "attr1");
        assert!(!part.is_file());
        assert_eq!(part.content_type(), "text/plain");
        assert_eq!(part.charset(), None);
    }

    #[test]
    fn file_part() {
        let part = PartHeader::from_headers(&[
            header("content-disposition", "form-data; name=\"somename\"; filename=\"somefile.dat\""),
            header("Content-Type", "application/octet-stream"),
            header("Content-Transfer-Encoding", "BINARY"),
        ])
        .unwrap();

        assert_eq!(part.name(), "somename");
        assert_eq!(part.file_name(), Some("somefile.dat"));
        assert_eq!(part.content_type(), "application/octet-stream");
        assert_eq!(part.content_transfer_encoding(), "binary");
    }

    #[test]
    fn extended_file_name_wins() {
        let part = PartHeader::from_headers(&[header(
            "Content-Disposition",
            "form-data; name=\"somename\"; filename=\"fallback.dat\"; filename*=\"UTF-8''%c2%a3%20and%20%e2%82%ac%20somefile.dat\"",
        )])
        .unwrap();

        assert_eq!(part.file_name(), Some("\u{a3} and \u{20ac} somefile.dat"));
    }

    #[test]
    fn unknown_extended_charset_falls_back() {
        let part = PartHeader::from_headers(&[header(
            "Content-Disposition",
            "form-data; name=f; filename=\"plain.txt\"; filename*=koi8-r''%c2",
        )])
        .unwrap();

        assert_eq!(part.file_name(), Some("plain.txt"));
    }

    #[test]
    fn quoted_semicolons_and_escapes() {
        let part = PartHeader::from_headers(&[header(
            "Content-Disposition",
            r#"form-data; name="a;b"; filename="say \"hi\".txt""#,
        )])
        .unwrap();

        assert_eq!(part.name(), "a;b");
        assert_eq!(part.file_name(), Some("say \"hi\".txt"));
    }

    #[test]
    fn part_charset() {
        let part = PartHeader::from_headers(&[
            header("Content-Disposition", "form-data; name=\"attr\""),
            header("Content-Type", "text/plain; charset=ISO-8859-1"),
        ])
        .unwrap();

        assert_eq!(part.charset(), Some(Charset::Iso8859_1));
        assert_eq!(part.content_type(), "text/plain");
    }

    #[test]
    fn missing_disposition_or_name() {
        assert!(PartHeader::from_headers(&[header("Content-Type", "text/plain")]).is_err());
        assert!(PartHeader::from_headers(&[header("Content-Disposition", "form-data; filename=\"a\"")]).is_err());
    }
}
