//! Human-readable order number generation.
//!
//! Format: `KCT-<year>-<6 digits>`, where the digits are the trailing six of
//! the current epoch-millisecond timestamp. The suffix distinguishes orders
//! created close together but is not collision-proof on its own; the order
//! store enforces uniqueness with a constraint and callers regenerate on
//! conflict.

use chrono::{DateTime, Datelike, Utc};

/// Prefix for all generated order numbers.
pub const ORDER_NUMBER_PREFIX: &str = "KCT";

/// Generate an order number for the given instant.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use kct_core::order_number::generate;
///
/// let at = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
/// assert_eq!(generate(at), "KCT-2023-123456");
/// ```
#[must_use]
pub fn generate(now: DateTime<Utc>) -> String {
    let suffix = now.timestamp_millis().rem_euclid(1_000_000);
    format!("{ORDER_NUMBER_PREFIX}-{}-{suffix:06}", now.year())
}

/// Whether a string looks like one of our order numbers.
#[must_use]
pub fn is_valid(candidate: &str) -> bool {
    let mut parts = candidate.splitn(3, '-');
    let (Some(prefix), Some(year), Some(suffix)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    prefix == ORDER_NUMBER_PREFIX
        && year.len() == 4
        && year.chars().all(|c| c.is_ascii_digit())
        && suffix.len() == 6
        && suffix.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_generate_format() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let number = generate(at);
        assert!(number.starts_with("KCT-2024-"));
        assert!(is_valid(&number));
    }

    #[test]
    fn test_suffix_is_trailing_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
        assert_eq!(generate(at), "KCT-2023-123456");
    }

    #[test]
    fn test_suffix_zero_padded() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_042).unwrap();
        assert!(generate(at).ends_with("-000042"));
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("KCT-2024-000123"));
        assert!(!is_valid("KCT-2024-123"));
        assert!(!is_valid("ACME-2024-000123"));
        assert!(!is_valid("KCT-24-000123"));
        assert!(!is_valid("not an order number"));
    }
}
