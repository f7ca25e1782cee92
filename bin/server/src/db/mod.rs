//! Postgres repositories implementing the library storage traits.
//!
//! Each repository owns a `PgPool` clone and converts between private
//! `FromRow` row structs and the domain types. IDs are stored as their
//! prefixed display strings; graphs, settings, and other structured
//! fields are JSONB.

pub mod execution;
pub mod job;
pub mod usage;
pub mod workflow;

use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::str::FromStr;

/// Decodes a prefixed ID column.
pub(crate) fn decode_id<T>(raw: &str, what: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: Display,
{
    T::from_str(raw).map_err(|e| decode_err(format!("invalid {what} '{raw}': {e}")))
}

/// Decodes a JSONB column into a domain type.
pub(crate) fn decode_json<T: DeserializeOwned>(
    value: serde_json::Value,
    what: &str,
) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| decode_err(format!("invalid {what}: {e}")))
}

/// Decodes a status-style TEXT column via its serde representation.
pub(crate) fn decode_str<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T, sqlx::Error> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| decode_err(format!("invalid {what} '{raw}': {e}")))
}

/// Encodes a serializable field for a JSONB column.
pub(crate) fn encode_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn decode_err(message: String) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}
