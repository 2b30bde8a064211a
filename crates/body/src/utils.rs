//! Small helpers shared across the ingestion pipeline.

/// Returns early with an error if a condition is not met.
///
/// Like `assert!`, but produces `Err($error)` instead of panicking, for
/// validation checks on untrusted input.
///
/// # Example
///
/// ```ignore
/// ensure!(boundary.len() <= MAX_BOUNDARY_LEN, BodyError::malformed("boundary too long"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Converts a signed limit where any negative value means "unlimited".
#[inline]
pub(crate) fn limit_of(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}
