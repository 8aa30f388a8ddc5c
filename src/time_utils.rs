use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("`{0}` is not an ISO-8601 timestamp")]
pub struct DeadlineParseError(pub String);

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parses an assessment deadline.
///
/// Accepts RFC 3339 (`2025-01-31T23:59:00+07:00`, `...Z`) and naive
/// date-times without an offset, which are taken as UTC.
pub fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, DeadlineParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DeadlineParseError(raw.to_string()));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DeadlineParseError(raw.to_string()))
}

/// Serde adapter for `deadline` fields in request bodies.
pub mod deadline_format {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_deadline(&raw).map_err(D::Error::custom)
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => super::parse_deadline(&raw).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
