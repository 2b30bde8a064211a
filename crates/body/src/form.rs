//! `application/x-www-form-urlencoded` decoding.
//!
//! Form bodies are decoded once, after the whole body has been buffered. Pairs
//! are separated by `&`, names and values by the first `=`, and both sides are
//! `+`-to-space and percent decoded before being interpreted in the request
//! charset.
//!
//! A zero-length segment (`a=b&&c=d`) is skipped, but a segment whose name
//! decodes to nothing (`a=b&=&c=d`) fails the whole decode.

use percent_encoding::percent_decode;

use crate::charset::Charset;
use crate::multimap::MultiMap;
use crate::utils::ensure;
use crate::BodyError;

/// Decodes a complete form body.
pub fn decode_form(bytes: &[u8], charset: Charset, max_attribute_size: Option<u64>) -> Result<MultiMap, BodyError> {
    let mut attributes = MultiMap::new();

    for segment in bytes.split(|&b| b == b'&') {
        if segment.is_empty() {
            continue;
        }

        let (name, value) = split_pair(segment);
        let name = decode_component(name, charset);
        ensure!(!name.is_empty(), BodyError::malformed("form attribute without name"));

        let value = decode_component(value, charset);
        if let Some(max) = max_attribute_size {
            ensure!(value.len() as u64 <= max, BodyError::malformed("form attribute size exceed allowed maximum capacity"));
        }

        attributes.add(name, value);
    }

    Ok(attributes)
}

/// Decodes a URI query string, dropping pairs without a name instead of failing.
pub fn decode_query(query: &str) -> MultiMap {
    query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (name, value) = split_pair(segment.as_bytes());
            (decode_component(name, Charset::Utf8), decode_component(value, Charset::Utf8))
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

fn split_pair(segment: &[u8]) -> (&[u8], &[u8]) {
    match memchr::memchr(b'=', segment) {
        Some(index) => (&segment[..index], &segment[index + 1..]),
        None => (segment, &[]),
    }
}

fn decode_component(raw: &[u8], charset: Charset) -> String {
    let bytes: Vec<u8> = if raw.contains(&b'+') {
        let replaced: Vec<u8> = raw.iter().map(|&b| if b == b'+' { b' ' } else { b }).collect();
        percent_decode(&replaced).collect()
    } else {
        percent_decode(raw).collect()
    };

    charset.decode(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(s: &str) -> Result<MultiMap, BodyError> {
        decode_form(s.as_bytes(), Charset::Utf8, None)
    }

    #[test]
    fn basic_form() {
        let attrs = decode("origin=junit-testUserAlias&login=admin%40foo.bar&pass+word=admin").unwrap();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs.get("origin"), Some("junit-testUserAlias"));
        assert_eq!(attrs.get("login"), Some("admin@foo.bar"));
        assert_eq!(attrs.get("pass word"), Some("admin"));
    }

    #[test]
    fn empty_segment_is_skipped() {
        let attrs = decode("a=b&&c=d").unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("a"), Some("b"));
        assert_eq!(attrs.get("c"), Some("d"));
    }

    #[test]
    fn empty_name_fails() {
        assert!(matches!(decode("a=b&=&c=d"), Err(BodyError::MalformedBody { .. })));
        assert!(matches!(decode("=value"), Err(BodyError::MalformedBody { .. })));
    }

    #[test]
    fn pair_without_equals_has_empty_value() {
        let attrs = decode("flag&x=1=2").unwrap();
        assert_eq!(attrs.get("flag"), Some(""));
        assert_eq!(attrs.get("x"), Some("1=2"));
    }

    #[test]
    fn round_trip_reserved_characters() {
        let pairs = vec![
            ("na me&=", "va+lue/?#%"),
            ("\u{e9}t\u{e9}", "\u{a3} and \u{20ac}"),
            ("k", "a=b&c=d"),
        ];
        let encoded = serde_urlencoded::to_string(&pairs).unwrap();
        let decoded = decode(&encoded).unwrap();

        let expected: MultiMap = pairs.into_iter().collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn latin1_form() {
        let attrs = decode_form(b"name=%FF", Charset::Iso8859_1, None).unwrap();
        assert_eq!(attrs.get("name"), Some("\u{FF}"));
    }

    #[test]
    fn attribute_size_limit() {
        assert!(decode_form(b"a=1234", Charset::Utf8, Some(4)).is_ok());
        assert!(matches!(decode_form(b"a=12345", Charset::Utf8, Some(4)), Err(BodyError::MalformedBody { .. })));
    }

    #[test]
    fn lenient_query() {
        let params = decode_query("p1=foo&=x&&p2=a%20b");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("p1"), Some("foo"));
        assert_eq!(params.get("p2"), Some("a b"));
    }
}
