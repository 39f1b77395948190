use chrono::{DateTime, Utc};

use super::RepositoryError;

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

pub(crate) fn to_i64(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("value for `{column}` does not fit in i64: {value}"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_json<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn to_json<T>(column: &str, value: &T) -> Result<String, RepositoryError>
where
    T: serde::Serialize,
{
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}
