//! Column decoding shared by the Postgres repositories.

use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::{Decode, Postgres, Row, Type};

use crate::error::{MeterError, Result};

pub(super) fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| MeterError::Internal(format!("Failed to read {column}: {e}")))
}

/// Text column holding one of the snake_case enum labels.
pub(super) fn label<T>(row: &PgRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    let raw: String = get(row, column)?;
    parse(&raw).ok_or_else(|| MeterError::Internal(format!("Unexpected {column} value '{raw}'")))
}

pub(super) fn json<T: DeserializeOwned>(row: &PgRow, column: &str) -> Result<T> {
    let value: serde_json::Value = get(row, column)?;
    serde_json::from_value(value)
        .map_err(|e| MeterError::Internal(format!("Failed to decode {column}: {e}")))
}

pub(super) fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

pub(super) fn db_error(context: &str) -> impl FnOnce(sqlx::Error) -> MeterError + '_ {
    move |e| MeterError::Internal(format!("{context}: {e}"))
}
