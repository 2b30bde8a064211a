//! Inputs shared by the micro-body benchmarks.
//!
//! Bodies are generated in code so every run measures the same bytes without
//! shipping fixture files.

/// The boundary used by every generated multipart body.
pub const BOUNDARY: &str = "dLV9Wyq26L_-JQxk6ferf-RT153LhOO";

#[derive(Debug, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    content: Vec<u8>,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, content: Vec<u8>) -> Self {
        Self { name, group, content }
    }

    pub fn small(name: &'static str, content: Vec<u8>) -> Self {
        Self::new(name, TestGroup::Small, content)
    }

    pub fn normal(name: &'static str, content: Vec<u8>) -> Self {
        Self::new(name, TestGroup::Normal, content)
    }

    pub fn large(name: &'static str, content: Vec<u8>) -> Self {
        Self::new(name, TestGroup::Large, content)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}

/// A multipart body with `attributes` short attribute parts followed by
/// `files` file parts of `file_size` bytes each.
pub fn multipart_body(attributes: usize, files: usize, file_size: usize) -> Vec<u8> {
    let mut body = Vec::with_capacity(files * (file_size + 128) + attributes * 96);

    for i in 0..attributes {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"attr{i}\"\r\n\r\nvalue of attribute {i}\r\n")
                .as_bytes(),
        );
    }

    for i in 0..files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file{i}\"; filename=\"file{i}.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        // carriage returns and dashes make the decoder check for partial delimiters
        body.extend((0..file_size).map(|n| match n % 97 {
            0 => b'\r',
            1 => b'\n',
            2 | 3 => b'-',
            m => b'a' + (m % 26) as u8,
        }));
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// A url-encoded body of `pairs` pairs, half of them needing percent decoding.
pub fn urlencoded_body(pairs: usize) -> Vec<u8> {
    (0..pairs)
        .map(|i| if i % 2 == 0 { format!("name{i}=plain+value+{i}") } else { format!("name{i}=%E2%82%AC%20{i}%26more") })
        .collect::<Vec<_>>()
        .join("&")
        .into_bytes()
}
