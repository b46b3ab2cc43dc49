//! Duration Labels
//!
//! Converts between human bar-duration labels (`"1m"`, `"2h"`, `"3d"`) and the
//! integer nanosecond periods used on the wire. A period of `0` denotes a tick
//! series.

/// Nanoseconds in one minute.
pub const MINUTE_NANOS: i64 = 60 * 1_000_000_000;

/// Nanoseconds in one hour.
pub const HOUR_NANOS: i64 = 60 * MINUTE_NANOS;

/// Nanoseconds in one day.
pub const DAY_NANOS: i64 = 24 * HOUR_NANOS;

/// Period value that selects the tick series.
pub const TICK_DURATION: i64 = 0;

/// Errors from duration parsing and formatting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    /// Label does not match `<digits><m|h|d>` or the period has no whole-minute label.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

/// Parse a duration label into nanoseconds.
///
/// Accepts `<digits><unit>` with unit `m`, `h` or `d`. The literal `"0"`
/// selects the tick series.
///
/// # Errors
///
/// Returns [`DurationError::InvalidDuration`] for any other shape, or when
/// the value overflows.
pub fn parse(label: &str) -> Result<i64, DurationError> {
    if label == "0" {
        return Ok(TICK_DURATION);
    }

    let invalid = || DurationError::InvalidDuration(label.to_string());

    let (split, _) = label.char_indices().last().ok_or_else(invalid)?;
    let (digits, unit) = label.split_at(split);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let unit_nanos = match unit {
        "m" => MINUTE_NANOS,
        "h" => HOUR_NANOS,
        "d" => DAY_NANOS,
        _ => return Err(invalid()),
    };

    let count: i64 = digits.parse().map_err(|_| invalid())?;
    count.checked_mul(unit_nanos).ok_or_else(invalid)
}

/// Format a nanosecond period as a label.
///
/// Picks days when the period is at least one day and divides evenly, then
/// hours, else minutes. `0` formats as `"0"`.
///
/// # Errors
///
/// Returns [`DurationError::InvalidDuration`] when the period is negative or
/// not a whole number of minutes.
pub fn format(nanos: i64) -> Result<String, DurationError> {
    if nanos == TICK_DURATION {
        return Ok("0".to_string());
    }
    if nanos < 0 || nanos % MINUTE_NANOS != 0 {
        return Err(DurationError::InvalidDuration(nanos.to_string()));
    }

    let label = if nanos % DAY_NANOS == 0 {
        format!("{}d", nanos / DAY_NANOS)
    } else if nanos % HOUR_NANOS == 0 {
        format!("{}h", nanos / HOUR_NANOS)
    } else {
        format!("{}m", nanos / MINUTE_NANOS)
    };
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn one_minute_in_nanos() {
        assert_eq!(parse("1m").unwrap(), 60_000_000_000);
    }

    #[test_case("1m" ; "one minute")]
    #[test_case("5m" ; "five minutes")]
    #[test_case("1h" ; "one hour")]
    #[test_case("2h" ; "two hours")]
    #[test_case("1d" ; "one day")]
    fn canonical_labels_round_trip(label: &str) {
        assert_eq!(format(parse(label).unwrap()).unwrap(), label);
    }

    #[test_case("" ; "empty")]
    #[test_case("m" ; "unit only")]
    #[test_case("10" ; "digits only")]
    #[test_case("5s" ; "seconds")]
    #[test_case("-1m" ; "negative")]
    #[test_case("1.5h" ; "fractional")]
    #[test_case("1M" ; "uppercase unit")]
    fn rejects_malformed_labels(label: &str) {
        assert!(matches!(parse(label), Err(DurationError::InvalidDuration(_))));
    }

    #[test]
    fn zero_selects_tick_series() {
        assert_eq!(parse("0").unwrap(), TICK_DURATION);
        assert_eq!(format(TICK_DURATION).unwrap(), "0");
    }

    #[test]
    fn format_prefers_largest_whole_unit() {
        assert_eq!(format(90 * MINUTE_NANOS).unwrap(), "90m");
        assert_eq!(format(48 * HOUR_NANOS).unwrap(), "2d");
        assert_eq!(format(36 * HOUR_NANOS).unwrap(), "36h");
    }

    #[test]
    fn format_rejects_sub_minute_periods() {
        assert!(format(1_000_000_000).is_err());
        assert!(format(-MINUTE_NANOS).is_err());
    }

    #[test]
    fn parse_rejects_overflow() {
        assert!(parse("999999999999999999d").is_err());
    }
}
