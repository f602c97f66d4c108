//! Binding JSON values to statement parameters.
//!
//! The parameter types inferred by the server when preparing the statement
//! decide how each value is encoded.

use std::error::Error;
use std::fmt::Display;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use jiff::Timestamp;
use jiff::civil::{Date, DateTime};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{
    Date as PgDate, IsNull, Timestamp as PgTimestamp, ToSql, Type, to_sql_checked,
};
use uuid::Uuid;

use crate::error::DriverError;

/// A parameter ready to be sent to the server.
pub(crate) type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// SQL `NULL` of any type.
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Converts bound values into parameters for the given parameter types.
pub(crate) fn bind_params(
    values: &[JsonValue],
    types: &[Type],
) -> Result<Vec<BoxedParam>, DriverError> {
    if values.len() != types.len() {
        return Err(DriverError::client(format!(
            "statement expects {} parameters, {} values were bound",
            types.len(),
            values.len()
        )));
    }

    values
        .iter()
        .zip(types)
        .enumerate()
        .map(|(i, (value, ty))| {
            bind_value(value, ty).map_err(|message| {
                DriverError::client(format!("cannot bind ${} as {ty}: {message}", i + 1))
            })
        })
        .collect()
}

fn bind_value(value: &JsonValue, ty: &Type) -> Result<BoxedParam, String> {
    if value.is_null() {
        return Ok(Box::new(SqlNull));
    }

    let param: BoxedParam = match *ty {
        Type::BOOL => Box::new(as_bool(value)?),
        Type::INT2 => Box::new(i16::try_from(as_i64(value)?).map_err(|e| e.to_string())?),
        Type::INT4 => Box::new(i32::try_from(as_i64(value)?).map_err(|e| e.to_string())?),
        Type::INT8 => Box::new(as_i64(value)?),
        Type::OID => Box::new(u32::try_from(as_i64(value)?).map_err(|e| e.to_string())?),
        Type::FLOAT4 => Box::new(as_f64(value)? as f32),
        Type::FLOAT8 => Box::new(as_f64(value)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Box::new(as_text(value))
        }
        Type::JSON | Type::JSONB => Box::new(value.clone()),
        Type::UUID => Box::new(as_str(value)?.parse::<Uuid>().map_err(|e| e.to_string())?),
        Type::BYTEA => Box::new(STANDARD.decode(as_str(value)?).map_err(|e| e.to_string())?),
        Type::NUMERIC => Box::new(as_decimal(value)?),
        Type::TIMESTAMPTZ => Box::new(parse_timestamp::<Timestamp>(as_str(value)?)?),
        Type::TIMESTAMP => Box::new(parse_timestamp::<DateTime>(as_str(value)?)?),
        Type::DATE => Box::new(parse_date(as_str(value)?)?),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            Box::new(as_array(value, |v| Ok(as_text(v)))?)
        }
        Type::INT4_ARRAY => Box::new(as_array(value, |v| {
            i32::try_from(as_i64(v)?).map_err(|e| e.to_string())
        })?),
        Type::INT8_ARRAY => Box::new(as_array(value, as_i64)?),
        Type::BOOL_ARRAY => Box::new(as_array(value, as_bool)?),
        _ => return Err("unsupported parameter type".into()),
    };

    Ok(param)
}

fn as_bool(value: &JsonValue) -> Result<bool, String> {
    match value {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::String(s) => match s.as_str() {
            "true" | "t" => Ok(true),
            "false" | "f" => Ok(false),
            _ => Err(format!("{s:?} is not a boolean")),
        },
        _ => Err(format!("{value} is not a boolean")),
    }
}

fn as_i64(value: &JsonValue) -> Result<i64, String> {
    match value {
        JsonValue::Number(n) => n.as_i64().ok_or_else(|| format!("{n} is not an integer")),
        JsonValue::String(s) => s.trim().parse().map_err(|_| format!("{s:?} is not an integer")),
        _ => Err(format!("{value} is not an integer")),
    }
}

fn as_f64(value: &JsonValue) -> Result<f64, String> {
    match value {
        JsonValue::Number(n) => n.as_f64().ok_or_else(|| format!("{n} is not a number")),
        JsonValue::String(s) => s.trim().parse().map_err(|_| format!("{s:?} is not a number")),
        _ => Err(format!("{value} is not a number")),
    }
}

fn as_str(value: &JsonValue) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{value} is not a string"))
}

/// Strings bind as-is; everything else binds as its JSON text.
fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_array<T>(
    value: &JsonValue,
    convert: impl Fn(&JsonValue) -> Result<T, String>,
) -> Result<Vec<Option<T>>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("{value} is not an array"))?;

    items
        .iter()
        .map(|item| match item {
            JsonValue::Null => Ok(None),
            item => convert(item).map(Some),
        })
        .collect()
}

/// Numbers and numeric strings, including scientific notation.
fn as_decimal(value: &JsonValue) -> Result<Decimal, String> {
    let text = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_owned(),
        _ => return Err(format!("{value} is not a number")),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| format!("{text:?} is not a decimal"))
}

fn parse_timestamp<T>(text: &str) -> Result<PgTimestamp<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    match text {
        "infinity" => Ok(PgTimestamp::PosInfinity),
        "-infinity" => Ok(PgTimestamp::NegInfinity),
        _ => text.parse().map(PgTimestamp::Value).map_err(|e: T::Err| e.to_string()),
    }
}

fn parse_date(text: &str) -> Result<PgDate<Date>, String> {
    match text {
        "infinity" => Ok(PgDate::PosInfinity),
        "-infinity" => Ok(PgDate::NegInfinity),
        _ => text.parse().map(PgDate::Value).map_err(|e: jiff::Error| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encode(value: JsonValue, ty: Type) -> Result<Vec<u8>, String> {
        let param = bind_value(&value, &ty)?;
        let mut out = BytesMut::new();
        match param.to_sql_checked(&ty, &mut out).map_err(|e| e.to_string())? {
            IsNull::Yes => Ok(Vec::new()),
            IsNull::No => Ok(out.to_vec()),
        }
    }

    #[test]
    fn test_bind_integers() {
        assert_eq!(encode(json!(5), Type::INT4).unwrap(), 5i32.to_be_bytes());
        assert_eq!(encode(json!("7"), Type::INT8).unwrap(), 7i64.to_be_bytes());
        assert!(encode(json!(70000), Type::INT2).is_err());
        assert!(encode(json!(1.5), Type::INT4).is_err());
    }

    #[test]
    fn test_bind_text_stringifies_scalars() {
        assert_eq!(encode(json!("abc"), Type::TEXT).unwrap(), b"abc");
        assert_eq!(encode(json!(12), Type::TEXT).unwrap(), b"12");
        assert_eq!(encode(json!({"a": 1}), Type::TEXT).unwrap(), br#"{"a":1}"#);
    }

    #[test]
    fn test_bind_null_for_any_type() {
        assert_eq!(encode(JsonValue::Null, Type::INT4).unwrap(), Vec::<u8>::new());
        assert_eq!(encode(JsonValue::Null, Type::INET).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_bind_timestamps() {
        assert_eq!(
            encode(json!("2000-01-01T00:00:01Z"), Type::TIMESTAMPTZ).unwrap(),
            1_000_000i64.to_be_bytes()
        );
        assert_eq!(
            encode(json!("2000-01-01T00:00:00"), Type::TIMESTAMP).unwrap(),
            0i64.to_be_bytes()
        );
        assert_eq!(encode(json!("2000-01-02"), Type::DATE).unwrap(), 1i32.to_be_bytes());
        assert_eq!(
            encode(json!("infinity"), Type::TIMESTAMPTZ).unwrap(),
            i64::MAX.to_be_bytes()
        );
        assert!(encode(json!("yesterday"), Type::DATE).is_err());
    }

    #[test]
    fn test_bind_numeric() {
        assert_eq!(as_decimal(&json!("12.3400")).unwrap().to_string(), "12.3400");
        assert_eq!(as_decimal(&json!(7)).unwrap(), Decimal::from(7));
        assert_eq!(as_decimal(&json!("1e3")).unwrap(), Decimal::from(1000));
        assert!(as_decimal(&json!("twelve")).is_err());
        assert!(as_decimal(&json!(true)).is_err());
        assert!(!encode(json!("12.34"), Type::NUMERIC).unwrap().is_empty());
    }

    #[test]
    fn test_bind_unsupported_type() {
        let err = bind_params(&[json!("10.0.0.1")], &[Type::INET]).unwrap_err();
        assert!(err.message().contains("cannot bind $1 as inet"));
        assert!(err.code().is_none());
    }

    #[test]
    fn test_bind_arity_mismatch() {
        let err = bind_params(&[json!(1), json!(2)], &[Type::INT4]).unwrap_err();
        assert!(err.message().contains("expects 1 parameters, 2 values"));
    }
}
