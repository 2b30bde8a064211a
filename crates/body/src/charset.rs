//! Character encodings accepted when turning body bytes into text.
//!
//! Only the encodings every HTTP stack is expected to understand are
//! supported; unknown labels fall back to UTF-8 at the call sites.

use std::borrow::Cow;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Iso8859_1,
    UsAscii,
    /// UTF-16 with an optional byte order mark, big endian when absent.
    Utf16,
    Utf16Be,
    Utf16Le,
}

impl Charset {
    /// Resolves a charset label as found in a `charset=` parameter.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches('"');
        let charset = match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Charset::Utf8,
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "l1" => Charset::Iso8859_1,
            "us-ascii" | "ascii" => Charset::UsAscii,
            "utf-16" | "utf16" => Charset::Utf16,
            "utf-16be" => Charset::Utf16Be,
            "utf-16le" => Charset::Utf16Le,
            _ => return None,
        };
        Some(charset)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::UsAscii => "US-ASCII",
            Charset::Utf16 => "UTF-16",
            Charset::Utf16Be => "UTF-16BE",
            Charset::Utf16Le => "UTF-16LE",
        }
    }

    /// Decodes `bytes`, replacing invalid sequences with U+FFFD.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes),
            Charset::Iso8859_1 => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
            Charset::UsAscii => {
                if bytes.is_ascii() {
                    String::from_utf8_lossy(bytes)
                } else {
                    Cow::Owned(bytes.iter().map(|&b| if b.is_ascii() { char::from(b) } else { '\u{FFFD}' }).collect())
                }
            }
            Charset::Utf16 => match bytes {
                [0xFE, 0xFF, rest @ ..] => Cow::Owned(decode_utf16(rest, u16::from_be_bytes)),
                [0xFF, 0xFE, rest @ ..] => Cow::Owned(decode_utf16(rest, u16::from_le_bytes)),
                _ => Cow::Owned(decode_utf16(bytes, u16::from_be_bytes)),
            },
            Charset::Utf16Be => Cow::Owned(decode_utf16(bytes, u16::from_be_bytes)),
            Charset::Utf16Le => Cow::Owned(decode_utf16(bytes, u16::from_le_bytes)),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let chunks = bytes.chunks_exact(2);
    let dangling = !chunks.remainder().is_empty();

    let mut s: String = char::decode_utf16(chunks.map(|pair| unit([pair[0], pair[1]])))
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if dangling {
        s.push(char::REPLACEMENT_CHARACTER);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(Charset::from_label("UTF-8"), Some(Charset::Utf8));
        assert_eq!(Charset::from_label("\"iso-8859-1\""), Some(Charset::Iso8859_1));
        assert_eq!(Charset::from_label("Utf-16"), Some(Charset::Utf16));
        assert_eq!(Charset::from_label("koi8-r"), None);
    }

    #[test]
    fn latin1() {
        assert_eq!(Charset::Iso8859_1.decode(&[0xFF]), "\u{FF}");
    }

    #[test]
    fn utf16_with_and_without_bom() {
        let text = "h\u{e9}llo \u{1F600}";
        let be: Vec<u8> = text.encode_utf16().flat_map(u16::to_be_bytes).collect();
        let le: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();

        assert_eq!(Charset::Utf16.decode(&be), text);
        assert_eq!(Charset::Utf16Le.decode(&le), text);

        let mut with_bom = vec![0xFF, 0xFE];
        with_bom.extend_from_slice(&le);
        assert_eq!(Charset::Utf16.decode(&with_bom), text);
    }

    #[test]
    fn lossy() {
        assert_eq!(Charset::Utf8.decode(&[b'a', 0xFF]), "a\u{FFFD}");
        assert_eq!(Charset::UsAscii.decode(&[b'a', 0xE9]), "a\u{FFFD}");
        assert_eq!(Charset::Utf16Be.decode(&[0x00, b'a', 0x00]), "a\u{FFFD}");
    }
}
