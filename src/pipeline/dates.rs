//! Due-date parsing and repair.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

/// Resolve an item's due date against the message it came from.
///
/// Missing dates and dates before the message fall back to the send date.
pub fn sanitize(due_date: Option<DateTime<Utc>>, message_date: DateTime<Utc>) -> DateTime<Utc> {
    match due_date {
        Some(due) if due >= message_date => due,
        _ => message_date,
    }
}

/// Parse a model-supplied due date.
///
/// Accepts RFC 3339, naive timestamps (read as UTC) and bare dates
/// (midnight UTC). Empty or unparseable input yields `None`.
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }
    warn!(due_date = s, "Unparseable due date, treating as absent");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn missing_due_date_uses_send_date() {
        let sent = at(2025, 2, 20);
        assert_eq!(sanitize(None, sent), sent);
    }

    #[test]
    fn past_due_date_is_clamped_forward() {
        let sent = at(2025, 2, 20);
        assert_eq!(sanitize(Some(at(2025, 1, 1)), sent), sent);
    }

    #[test]
    fn future_and_equal_due_dates_are_kept() {
        let sent = at(2025, 2, 20);
        assert_eq!(sanitize(Some(at(2025, 3, 1)), sent), at(2025, 3, 1));
        assert_eq!(sanitize(Some(sent), sent), sent);
    }

    #[test]
    fn parses_supported_formats() {
        assert_eq!(parse_due_date("2025-02-20"), Some(at(2025, 2, 20)));
        assert_eq!(
            parse_due_date("2025-02-20T17:30:00"),
            Some(Utc.with_ymd_and_hms(2025, 2, 20, 17, 30, 0).unwrap())
        );
        assert_eq!(
            parse_due_date("2025-02-20 17:30:00"),
            Some(Utc.with_ymd_and_hms(2025, 2, 20, 17, 30, 0).unwrap())
        );
        assert_eq!(
            parse_due_date("2025-02-20T17:30:00+01:00"),
            Some(Utc.with_ymd_and_hms(2025, 2, 20, 16, 30, 0).unwrap())
        );
    }

    #[test]
    fn unparseable_due_date_is_none() {
        assert_eq!(parse_due_date(""), None);
        assert_eq!(parse_due_date("next Friday"), None);
        assert_eq!(parse_due_date("2025-13-45"), None);
    }
}
