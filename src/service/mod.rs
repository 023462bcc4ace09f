//! Resource services: the only writers of metadata rows and blobs.

pub mod content_service;
pub mod name_locks;
pub mod page_service;
pub mod password;
pub mod sweeper;
pub mod user_context;
pub mod user_service;

use chrono::{DateTime, NaiveDate};
use rusqlite::types::Value;
use serde::Deserialize;

use crate::error::{StoreError, StoreResult};

/// Raw list parameters as they arrive on the query string.
///
/// Each service decides which of the filter keys it honours.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub size: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub template: Option<String>,
    pub since: Option<String>,
}

/// Blank strings mean "no filter"
pub(crate) fn text_filter(raw: &Option<String>) -> Option<Value> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::Text(s.to_string()))
}

/// Accepts RFC 3339, a bare `YYYY-MM-DD` date, or unix seconds.
pub(crate) fn since_filter(raw: &Option<String>) -> StoreResult<Option<Value>> {
    let raw = match raw.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(None),
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(Value::Integer(at.timestamp())));
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
            return Ok(Some(Value::Integer(midnight.and_utc().timestamp())));
        }
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(Some(Value::Integer(secs)));
    }
    Err(StoreError::Validation(format!("unrecognized date in since: {}", raw)))
}

/// Names identify records to their owners; surrounding whitespace is not significant.
pub(crate) fn require_name(name: &str) -> StoreResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_formats() {
        let expected = Some(Value::Integer(1_704_067_200));
        assert_eq!(since_filter(&Some("2024-01-01".into())).unwrap(), expected);
        assert_eq!(since_filter(&Some("2024-01-01T00:00:00Z".into())).unwrap(), expected);
        assert_eq!(since_filter(&Some("2024-01-01T02:00:00+02:00".into())).unwrap(), expected);
        assert_eq!(since_filter(&Some("1704067200".into())).unwrap(), expected);
        assert_eq!(since_filter(&None).unwrap(), None);
        assert_eq!(since_filter(&Some("  ".into())).unwrap(), None);
        assert!(matches!(since_filter(&Some("last tuesday".into())), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_blank_text_filters_are_dropped() {
        assert_eq!(text_filter(&Some("".into())), None);
        assert_eq!(text_filter(&Some(" docs ".into())), Some(Value::Text("docs".into())));
        assert_eq!(text_filter(&None), None);
    }

    #[test]
    fn test_require_name() {
        assert_eq!(require_name("  a.txt ").unwrap(), "a.txt");
        assert!(require_name("   ").is_err());
    }
}
