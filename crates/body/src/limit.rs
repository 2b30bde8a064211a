//! Body size enforcement.
//!
//! [`LimitEnforcer`] counts every byte admitted into the pipeline and fails the
//! request the moment the running total crosses the configured ceiling, so an
//! oversized body is rejected while streaming instead of after buffering.
//!
//! [`DeclaredLength`] interprets the `Content-Length` header. Anything that is
//! not a single well-formed non-negative integer is treated as unknown and
//! leaves enforcement entirely to the streaming check.

use http::HeaderMap;
use http::header::CONTENT_LENGTH;
use tracing::{trace, warn};

use crate::BodyError;
use crate::utils::{ensure, limit_of};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeclaredLength {
    Unknown,
    Known(u64),
}

impl DeclaredLength {
    /// Reads the declared length, collapsing absent, empty, negative,
    /// unparseable, overflowing and conflicting values into `Unknown`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut declared = None;

        for value in headers.get_all(CONTENT_LENGTH) {
            let Some(length) = value.to_str().ok().and_then(|s| s.trim().parse::<u64>().ok()) else {
                trace!(value = ?value, "ignore invalid content-length");
                return DeclaredLength::Unknown;
            };

            match declared {
                Some(previous) if previous != length => return DeclaredLength::Unknown,
                _ => declared = Some(length),
            }
        }

        declared.map_or(DeclaredLength::Unknown, DeclaredLength::Known)
    }

    pub fn known(&self) -> Option<u64> {
        match self {
            DeclaredLength::Known(length) => Some(*length),
            DeclaredLength::Unknown => None,
        }
    }
}

/// Tracks the bytes consumed by one request against its ceiling.
#[derive(Debug, Clone)]
pub struct LimitEnforcer {
    limit: Option<u64>,
    bytes_read: u64,
}

impl LimitEnforcer {
    /// Creates an enforcer, any negative `body_limit` disables the ceiling.
    pub fn new(body_limit: i64) -> Self {
        Self { limit: limit_of(body_limit), bytes_read: 0 }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Accounts for `n` more bytes.
    ///
    /// Returns `PayloadTooLarge` as soon as the running total exceeds the limit;
    /// the caller must stop ingesting immediately.
    pub fn admit(&mut self, n: usize) -> Result<(), BodyError> {
        self.bytes_read = self.bytes_read.saturating_add(n as u64);

        if let Some(limit) = self.limit {
            if self.bytes_read > limit {
                warn!(bytes_read = self.bytes_read, limit = limit, "request body exceed the limit");
                return Err(BodyError::payload_too_large(limit));
            }
        }

        Ok(())
    }

    /// Rejects up front a body that is certain to cross the limit.
    ///
    /// Only fires when the header and the transport framing agree on the exact
    /// size, in which case streaming would reach the same verdict.
    pub fn check_declared(&self, declared: DeclaredLength, exact_size: Option<u64>) -> Result<(), BodyError> {
        let (Some(limit), DeclaredLength::Known(length)) = (self.limit, declared) else {
            return Ok(());
        };

        if exact_size == Some(length) {
            ensure!(length <= limit, BodyError::payload_too_large(limit));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(CONTENT_LENGTH, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn admit_until_limit() {
        let mut enforcer = LimitEnforcer::new(10);
        assert!(enforcer.admit(4).is_ok());
        assert!(enforcer.admit(6).is_ok());
        assert_eq!(enforcer.bytes_read(), 10);

        let result = enforcer.admit(1);
        assert!(matches!(result, Err(BodyError::PayloadTooLarge { limit: 10 })));
    }

    #[test]
    fn unlimited() {
        let mut enforcer = LimitEnforcer::new(-1);
        assert!(enforcer.admit(usize::MAX).is_ok());
        assert!(enforcer.admit(usize::MAX).is_ok());
        assert_eq!(enforcer.limit(), None);
    }

    #[test]
    fn zero_limit_accepts_empty_body() {
        let mut enforcer = LimitEnforcer::new(0);
        assert!(enforcer.admit(0).is_ok());
        assert!(enforcer.admit(1).is_err());
    }

    #[test]
    fn declared_length_parsing() {
        assert_eq!(DeclaredLength::from_headers(&HeaderMap::new()), DeclaredLength::Unknown);
        assert_eq!(DeclaredLength::from_headers(&headers(&[""])), DeclaredLength::Unknown);
        assert_eq!(DeclaredLength::from_headers(&headers(&["-1"])), DeclaredLength::Unknown);
        assert_eq!(DeclaredLength::from_headers(&headers(&["abc"])), DeclaredLength::Unknown);
        assert_eq!(
            DeclaredLength::from_headers(&headers(&["99999999999999999999999999"])),
            DeclaredLength::Unknown
        );
        assert_eq!(DeclaredLength::from_headers(&headers(&["10", "12"])), DeclaredLength::Unknown);

        assert_eq!(DeclaredLength::from_headers(&headers(&["42"])), DeclaredLength::Known(42));
        assert_eq!(DeclaredLength::from_headers(&headers(&["42", "42"])), DeclaredLength::Known(42));
        assert_eq!(
            DeclaredLength::from_headers(&headers(&[&i64::MAX.to_string()])),
            DeclaredLength::Known(i64::MAX as u64)
        );
    }

    #[test]
    fn declared_length_only_short_circuits_with_exact_framing() {
        let enforcer = LimitEnforcer::new(100);

        assert!(enforcer.check_declared(DeclaredLength::Known(1000), Some(1000)).is_err());
        // header disagrees with framing: leave it to streaming
        assert!(enforcer.check_declared(DeclaredLength::Known(1000), None).is_ok());
        assert!(enforcer.check_declared(DeclaredLength::Known(1000), Some(10)).is_ok());
        assert!(enforcer.check_declared(DeclaredLength::Unknown, Some(1000)).is_ok());
        assert!(enforcer.check_declared(DeclaredLength::Known(100), Some(100)).is_ok());

        assert!(LimitEnforcer::new(-1).check_declared(DeclaredLength::Known(u64::MAX), Some(u64::MAX)).is_ok());
    }
}
