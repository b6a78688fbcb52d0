//! Parsing of human-entered sizes and durations.
//!
//! Sizes accept binary suffixes (`K`, `M`, `G`); durations accept `m` for
//! minutes and `h` for hours.  Bare numbers pass through unchanged and an
//! unrecognized suffix is ignored, so `"30s"` reads as 30.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("'{input}' does not start with a number")]
    NotANumber { input: String },

    #[error("'{input}' overflows")]
    Overflow { input: String },
}

/// Parse a byte count such as `512`, `64K`, `10M` or `1G`.
pub fn parse_size(input: &str) -> Result<u64, UnitError> {
    let (value, suffix) = split_number(input)?;
    let shift = match suffix.chars().next() {
        Some('K') => 10,
        Some('M') => 20,
        Some('G') => 30,
        _ => 0,
    };
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| UnitError::Overflow {
            input: input.to_string(),
        })
}

/// Parse a duration in whole seconds such as `45`, `5m` or `2h`.
pub fn parse_seconds(input: &str) -> Result<u64, UnitError> {
    let (value, suffix) = split_number(input)?;
    let factor = match suffix.chars().next() {
        Some('m') => 60,
        Some('h') => 3600,
        _ => 1,
    };
    value.checked_mul(factor).ok_or_else(|| UnitError::Overflow {
        input: input.to_string(),
    })
}

fn split_number(input: &str) -> Result<(u64, &str), UnitError> {
    let trimmed = input.trim();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if end == 0 {
        return Err(UnitError::NotANumber {
            input: input.to_string(),
        });
    }
    let value = trimmed[..end]
        .parse::<u64>()
        .map_err(|_| UnitError::Overflow {
            input: input.to_string(),
        })?;
    Ok((value, &trimmed[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("64K").unwrap(), 65_536);
        assert_eq!(parse_size("10M").unwrap(), 10 * 1_048_576);
        assert_eq!(parse_size("1G").unwrap(), 1_073_741_824);
    }

    #[test]
    fn test_duration_suffixes() {
        assert_eq!(parse_seconds("45").unwrap(), 45);
        assert_eq!(parse_seconds("5m").unwrap(), 300);
        assert_eq!(parse_seconds("2h").unwrap(), 7200);
        // Unknown suffixes are ignored.
        assert_eq!(parse_seconds("30s").unwrap(), 30);
    }

    #[test]
    fn test_suffixes_are_case_sensitive() {
        // 'k' is not a size suffix and 'M' is not a duration suffix.
        assert_eq!(parse_size("3k").unwrap(), 3);
        assert_eq!(parse_seconds("3M").unwrap(), 3);
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(matches!(
            parse_size("abc"),
            Err(UnitError::NotANumber { .. })
        ));
        assert!(parse_seconds("").is_err());
    }

    #[test]
    fn test_overflow_is_reported() {
        assert!(matches!(
            parse_size("99999999999999G"),
            Err(UnitError::Overflow { .. })
        ));
    }
}
