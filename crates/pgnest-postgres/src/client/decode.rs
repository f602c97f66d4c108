//! Decoding result rows into JSON values.
//!
//! Rows are returned in binary format by the extended protocol and every
//! supported type goes through a `FromSql` implementation. Date/time values
//! are read as `jiff` types and numerics as [`Decimal`], then rendered as
//! strings so no precision is lost.

use std::error::Error;
use std::fmt::Display;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jiff::Timestamp;
use jiff::civil::{Date, DateTime};
use rust_decimal::Decimal;
use serde_json::{Number, Value as JsonValue};
use tokio_postgres::SimpleQueryRow;
use tokio_postgres::types::{Date as PgDate, FromSql, Timestamp as PgTimestamp, Type};
use uuid::Uuid;

use crate::Row;
use crate::error::DriverError;

/// Borrowed wire bytes of a value of any type.
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Decodes a row returned by the extended protocol.
pub(crate) fn decode_row(row: &tokio_postgres::Row) -> Result<Row, DriverError> {
    let mut decoded = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, column.type_())?;
        decoded.insert(column.name().to_owned(), value);
    }

    Ok(decoded)
}

/// Decodes a row returned by the simple protocol, where every value is text.
pub(crate) fn decode_simple_row(row: &SimpleQueryRow) -> Result<Row, DriverError> {
    let mut decoded = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = row.try_get(idx)?.map(str::to_owned);
        decoded.insert(column.name().to_owned(), JsonValue::from(value));
    }

    Ok(decoded)
}

fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> Result<JsonValue, DriverError> {
    let value = match *ty {
        Type::BOOL => JsonValue::from(row.try_get::<_, Option<bool>>(idx)?),
        Type::INT2 => JsonValue::from(row.try_get::<_, Option<i16>>(idx)?),
        Type::INT4 => JsonValue::from(row.try_get::<_, Option<i32>>(idx)?),
        Type::INT8 => JsonValue::from(row.try_get::<_, Option<i64>>(idx)?),
        Type::OID => JsonValue::from(row.try_get::<_, Option<u32>>(idx)?),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map_or(JsonValue::Null, |v| float_to_json(f64::from(v))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)?
            .map_or(JsonValue::Null, float_to_json),
        Type::NUMERIC => JsonValue::from(
            row.try_get::<_, Option<Decimal>>(idx)?
                .map(|decimal| decimal.to_string()),
        ),
        Type::TIMESTAMPTZ => {
            timestamp_to_json(row.try_get::<_, Option<PgTimestamp<Timestamp>>>(idx)?)
        }
        Type::TIMESTAMP => {
            timestamp_to_json(row.try_get::<_, Option<PgTimestamp<DateTime>>>(idx)?)
        }
        Type::DATE => date_to_json(row.try_get::<_, Option<PgDate<Date>>>(idx)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            JsonValue::from(row.try_get::<_, Option<String>>(idx)?)
        }
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<JsonValue>>(idx)?
            .unwrap_or(JsonValue::Null),
        Type::UUID => JsonValue::from(
            row.try_get::<_, Option<Uuid>>(idx)?
                .map(|uuid| uuid.to_string()),
        ),
        Type::BYTEA => JsonValue::from(
            row.try_get::<_, Option<Vec<u8>>>(idx)?
                .map(|bytes| STANDARD.encode(bytes)),
        ),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            JsonValue::from(row.try_get::<_, Option<Vec<Option<String>>>>(idx)?)
        }
        Type::INT4_ARRAY => JsonValue::from(row.try_get::<_, Option<Vec<Option<i32>>>>(idx)?),
        Type::INT8_ARRAY => JsonValue::from(row.try_get::<_, Option<Vec<Option<i64>>>>(idx)?),
        Type::BOOL_ARRAY => JsonValue::from(row.try_get::<_, Option<Vec<Option<bool>>>>(idx)?),
        _ => row
            .try_get::<_, Option<RawValue<'_>>>(idx)?
            .map_or(JsonValue::Null, |raw| raw_to_json(raw.0)),
    };

    Ok(value)
}

/// Renders `timestamp` and `timestamptz` values, keeping infinities.
fn timestamp_to_json<T: Display>(value: Option<PgTimestamp<T>>) -> JsonValue {
    JsonValue::from(value.map(|value| match value {
        PgTimestamp::PosInfinity => "infinity".to_owned(),
        PgTimestamp::NegInfinity => "-infinity".to_owned(),
        PgTimestamp::Value(value) => value.to_string(),
    }))
}

fn date_to_json<T: Display>(value: Option<PgDate<T>>) -> JsonValue {
    JsonValue::from(value.map(|value| match value {
        PgDate::PosInfinity => "infinity".to_owned(),
        PgDate::NegInfinity => "-infinity".to_owned(),
        PgDate::Value(value) => value.to_string(),
    }))
}

/// Types without a dedicated mapping come back as text, or as base64 when
/// their wire bytes are not UTF-8.
fn raw_to_json(raw: &[u8]) -> JsonValue {
    match std::str::from_utf8(raw) {
        Ok(text) => JsonValue::String(text.to_owned()),
        Err(_) => JsonValue::String(STANDARD.encode(raw)),
    }
}

fn float_to_json(value: f64) -> JsonValue {
    match Number::from_f64(value) {
        Some(number) => JsonValue::Number(number),
        None if value.is_nan() => JsonValue::String("NaN".into()),
        None if value.is_sign_positive() => JsonValue::String("Infinity".into()),
        None => JsonValue::String("-Infinity".into()),
    }
}
