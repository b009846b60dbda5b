//! Human time expressions accepted in `from` / `until`.
//!
//! Supported forms: `now`, `now-<n><unit>`, `now+<n><unit>` (units `s`, `m`,
//! `h`, `d`, `w`, `mo`, `y`), unix seconds, and RFC 3339 timestamps.

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeExprError {
    #[error("empty time expression")]
    Empty,
    #[error("unrecognized time expression {0:?}")]
    Unrecognized(String),
    #[error("unknown time unit {unit:?} in {expr:?}")]
    UnknownUnit { expr: String, unit: String },
    #[error("time expression {0:?} is out of range")]
    OutOfRange(String),
}

/// Resolves `expr` relative to `now`.
pub fn parse_time(expr: &str, now: OffsetDateTime) -> Result<OffsetDateTime, TimeExprError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(TimeExprError::Empty);
    }
    if let Some(rest) = expr.strip_prefix("now") {
        if rest.is_empty() {
            return Ok(now);
        }
        return parse_relative(expr, rest, now);
    }
    if expr.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = expr
            .parse()
            .map_err(|_| TimeExprError::OutOfRange(expr.to_string()))?;
        return OffsetDateTime::from_unix_timestamp(secs)
            .map_err(|_| TimeExprError::OutOfRange(expr.to_string()));
    }
    OffsetDateTime::parse(expr, &Rfc3339).map_err(|_| TimeExprError::Unrecognized(expr.to_string()))
}

fn parse_relative(
    expr: &str,
    rest: &str,
    now: OffsetDateTime,
) -> Result<OffsetDateTime, TimeExprError> {
    let unrecognized = || TimeExprError::Unrecognized(expr.to_string());
    let (negative, amount) = match rest.as_bytes().first() {
        Some(b'-') => (true, &rest[1..]),
        Some(b'+') => (false, &rest[1..]),
        _ => return Err(unrecognized()),
    };
    let digits = amount.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(unrecognized());
    }
    let (number, unit) = amount.split_at(digits);
    let unit_secs = unit_seconds(unit).ok_or_else(|| TimeExprError::UnknownUnit {
        expr: expr.to_string(),
        unit: unit.to_string(),
    })?;
    let out_of_range = || TimeExprError::OutOfRange(expr.to_string());
    let secs = number
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_mul(unit_secs))
        .ok_or_else(out_of_range)?;
    let offset = Duration::seconds(secs);
    let resolved = if negative {
        now.checked_sub(offset)
    } else {
        now.checked_add(offset)
    };
    resolved.ok_or_else(out_of_range)
}

fn unit_seconds(unit: &str) -> Option<i64> {
    const DAY: i64 = 24 * 60 * 60;
    Some(match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => DAY,
        "w" => 7 * DAY,
        "mo" => 30 * DAY,
        "y" => 365 * DAY,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    #[test]
    fn now_and_relative_offsets() {
        assert_eq!(parse_time("now", NOW), Ok(NOW));
        assert_eq!(parse_time(" now ", NOW), Ok(NOW));
        assert_eq!(parse_time("now-1h", NOW), Ok(datetime!(2024-05-01 11:00 UTC)));
        assert_eq!(parse_time("now-30m", NOW), Ok(datetime!(2024-05-01 11:30 UTC)));
        assert_eq!(parse_time("now+2d", NOW), Ok(datetime!(2024-05-03 12:00 UTC)));
        assert_eq!(parse_time("now-1mo", NOW), Ok(datetime!(2024-04-01 12:00 UTC)));
        assert_eq!(parse_time("now-1w", NOW), Ok(datetime!(2024-04-24 12:00 UTC)));
    }

    #[test]
    fn unix_seconds_and_rfc3339() {
        assert_eq!(parse_time("1714564800", NOW), Ok(NOW));
        assert_eq!(parse_time("2024-05-01T12:00:00Z", NOW), Ok(NOW));
        assert_eq!(
            parse_time("2024-05-01T14:00:00+02:00", NOW),
            Ok(datetime!(2024-05-01 12:00 UTC))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_time("", NOW), Err(TimeExprError::Empty));
        assert!(matches!(
            parse_time("yesterday", NOW),
            Err(TimeExprError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_time("now-", NOW),
            Err(TimeExprError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_time("nowish", NOW),
            Err(TimeExprError::Unrecognized(_))
        ));
        assert_eq!(
            parse_time("now-3fortnights", NOW),
            Err(TimeExprError::UnknownUnit {
                expr: "now-3fortnights".to_string(),
                unit: "fortnights".to_string()
            })
        );
        assert!(matches!(
            parse_time("now-99999999999999999y", NOW),
            Err(TimeExprError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_time("99999999999999999", NOW),
            Err(TimeExprError::OutOfRange(_))
        ));
    }
}
