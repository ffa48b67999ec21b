//! Scalar → PostgreSQL parameter and row → JSON conversion.
//!
//! Parameter types come from the prepared statement, so a JSON string can
//! bind to a `uuid` or `timestamptz` column without the model having to
//! know anything about PostgreSQL's type system.

use std::error::Error as StdError;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use qd_domain::error::{Error, Result};
use qd_domain::query::Scalar;
use serde_json::{Map, Number, Value};
use tokio_postgres::types::{accepts, to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::Row;

type BoxError = Box<dyn StdError + Sync + Send>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SQL NULL for a parameter of any type.
#[derive(Debug, Clone, Copy)]
pub struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(&self, _: &Type, _: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        Ok(IsNull::Yes)
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A label of a user-defined enum type, sent and received as its text.
#[derive(Debug, Clone)]
pub struct EnumLabel(pub String);

impl ToSql for EnumLabel {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        out.put_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(EnumLabel(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// An arbitrary-precision `numeric` held as its decimal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgNumeric(String);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
/// Largest display scale the server accepts.
const NUMERIC_DSCALE_MAX: usize = 0x3FFF;

impl PgNumeric {
    /// Accepts `[-+]digits[.digits]`.
    pub fn parse(text: &str) -> Option<Self> {
        let t = text.trim();
        let unsigned = t.strip_prefix(['-', '+']).unwrap_or(t);
        let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let well_formed = !(int.is_empty() && frac.is_empty())
            && int.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b.is_ascii_digit());
        well_formed.then(|| PgNumeric(t.trim_start_matches('+').to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Integers that fit `i64` become JSON integers, everything else `f64`.
    /// `NaN` becomes `null`.
    pub fn to_json(&self) -> Value {
        if !self.0.contains('.') {
            if let Ok(i) = self.0.parse::<i64>() {
                return Value::Number(i.into());
            }
        }
        self.0
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }
}

impl ToSql for PgNumeric {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        let negative = self.0.starts_with('-');
        let unsigned = self.0.trim_start_matches('-');
        let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let int = int.trim_start_matches('0');
        if frac.len() > NUMERIC_DSCALE_MAX {
            return Err(format!(
                "numeric has {} digits after the decimal point, limit is {NUMERIC_DSCALE_MAX}",
                frac.len()
            )
            .into());
        }

        // Base-10000 digit groups: integer part padded on the left,
        // fraction padded on the right.
        let int_pad = (4 - int.len() % 4) % 4;
        let frac_pad = (4 - frac.len() % 4) % 4;
        let int_digits = format!("{}{}", "0".repeat(int_pad), int);
        let frac_digits = format!("{}{}", frac, "0".repeat(frac_pad));

        let mut groups: Vec<i16> = Vec::new();
        for chunk in int_digits.as_bytes().chunks(4).chain(frac_digits.as_bytes().chunks(4)) {
            groups.push(std::str::from_utf8(chunk)?.parse()?);
        }
        let too_wide = || format!("numeric has too many digits ({})", unsigned.len());
        let mut weight = i16::try_from(int_digits.len() / 4).map_err(|_| too_wide())? - 1;

        while groups.first() == Some(&0) {
            groups.remove(0);
            weight -= 1;
        }
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        let ndigits = i16::try_from(groups.len()).map_err(|_| too_wide())?;
        out.put_i16(ndigits);
        out.put_i16(weight);
        out.put_u16(if negative && !groups.is_empty() { NUMERIC_NEG } else { 0 });
        out.put_u16(frac.len() as u16);
        for g in groups {
            out.put_i16(g);
        }
        Ok(IsNull::No)
    }

    accepts!(NUMERIC);

    to_sql_checked!();
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        if raw.len() < 8 {
            return Err("numeric value too short".into());
        }
        let read_i16 = |at: usize| i16::from_be_bytes([raw[at], raw[at + 1]]);
        let ndigits = read_i16(0).max(0) as usize;
        let weight = read_i16(2) as i32;
        let sign = read_i16(4) as u16;
        let dscale = read_i16(6).max(0) as usize;
        if raw.len() < 8 + ndigits * 2 {
            return Err("numeric value truncated".into());
        }
        if sign & NUMERIC_NAN == NUMERIC_NAN {
            return Ok(PgNumeric("NaN".into()));
        }
        let digits: Vec<i16> = (0..ndigits).map(|i| read_i16(8 + i * 2)).collect();
        let digit_at = |pos: i32| -> i16 {
            if pos < 0 {
                0
            } else {
                digits.get(pos as usize).copied().unwrap_or(0)
            }
        };

        let mut text = String::new();
        if sign == NUMERIC_NEG {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            for pos in 0..=weight {
                if pos == 0 {
                    text.push_str(&digit_at(pos).to_string());
                } else {
                    text.push_str(&format!("{:04}", digit_at(pos)));
                }
            }
        }
        if dscale > 0 {
            let mut frac = String::new();
            let mut pos = weight + 1;
            while frac.len() < dscale {
                frac.push_str(&format!("{:04}", digit_at(pos)));
                pos += 1;
            }
            frac.truncate(dscale);
            text.push('.');
            text.push_str(&frac);
        }
        Ok(PgNumeric(text))
    }

    accepts!(NUMERIC);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One bound parameter, already converted to the statement's type.
#[derive(Debug)]
pub enum PgParam {
    Null(SqlNull),
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(PgNumeric),
    Text(String),
    Enum(EnumLabel),
    Uuid(uuid::Uuid),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(Value),
}

impl PgParam {
    pub fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            PgParam::Null(v) => v,
            PgParam::Bool(v) => v,
            PgParam::Int2(v) => v,
            PgParam::Int4(v) => v,
            PgParam::Int8(v) => v,
            PgParam::Float4(v) => v,
            PgParam::Float8(v) => v,
            PgParam::Numeric(v) => v,
            PgParam::Text(v) => v,
            PgParam::Enum(v) => v,
            PgParam::Uuid(v) => v,
            PgParam::Timestamp(v) => v,
            PgParam::TimestampTz(v) => v,
            PgParam::Date(v) => v,
            PgParam::Time(v) => v,
            PgParam::Json(v) => v,
        }
    }
}

/// Convert the scalar bound to `$position` into a parameter of type `ty`.
pub fn scalar_to_param(value: &Scalar, ty: &Type, position: usize) -> Result<PgParam> {
    let mismatch = || {
        Error::Validation(format!(
            "parameter ${position}: cannot bind {} value {} to type {}",
            value.type_label(),
            serde_json::to_string(value).unwrap_or_default(),
            ty.name()
        ))
    };

    if let Scalar::Null = value {
        return Ok(PgParam::Null(SqlNull));
    }
    if let Kind::Enum(_) = ty.kind() {
        return match value {
            Scalar::Text(s) => Ok(PgParam::Enum(EnumLabel(s.clone()))),
            _ => Err(mismatch()),
        };
    }

    let param = match *ty {
        Type::BOOL => match value {
            Scalar::Bool(b) => PgParam::Bool(*b),
            Scalar::Text(s) => PgParam::Bool(parse_bool(s).ok_or_else(mismatch)?),
            _ => return Err(mismatch()),
        },
        Type::INT2 => PgParam::Int2(i16::try_from(as_i64(value).ok_or_else(mismatch)?).map_err(|_| mismatch())?),
        Type::INT4 => PgParam::Int4(i32::try_from(as_i64(value).ok_or_else(mismatch)?).map_err(|_| mismatch())?),
        Type::INT8 => PgParam::Int8(as_i64(value).ok_or_else(mismatch)?),
        Type::FLOAT4 => PgParam::Float4(as_f64(value).ok_or_else(mismatch)? as f32),
        Type::FLOAT8 => PgParam::Float8(as_f64(value).ok_or_else(mismatch)?),
        Type::NUMERIC => {
            let text = match value {
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) if f.is_finite() => f.to_string(),
                Scalar::Text(s) => s.clone(),
                _ => return Err(mismatch()),
            };
            PgParam::Numeric(PgNumeric::parse(&text).ok_or_else(mismatch)?)
        }
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            PgParam::Text(match value {
                Scalar::Text(s) => s.clone(),
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Bool(b) => b.to_string(),
                Scalar::Null => return Ok(PgParam::Null(SqlNull)),
            })
        }
        Type::UUID => match value {
            Scalar::Text(s) => PgParam::Uuid(s.trim().parse().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        },
        Type::TIMESTAMP => match value {
            Scalar::Text(s) => PgParam::Timestamp(parse_naive_datetime(s).ok_or_else(mismatch)?),
            _ => return Err(mismatch()),
        },
        Type::TIMESTAMPTZ => match value {
            Scalar::Text(s) => PgParam::TimestampTz(parse_datetime_utc(s).ok_or_else(mismatch)?),
            _ => return Err(mismatch()),
        },
        Type::DATE => match value {
            Scalar::Text(s) => PgParam::Date(
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| mismatch())?,
            ),
            _ => return Err(mismatch()),
        },
        Type::TIME => match value {
            Scalar::Text(s) => PgParam::Time(
                NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
                    .map_err(|_| mismatch())?,
            ),
            _ => return Err(mismatch()),
        },
        Type::JSON | Type::JSONB => PgParam::Json(match value {
            // A string holding JSON is bound as that document.
            Scalar::Text(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            other => serde_json::to_value(other)?,
        }),
        _ => {
            return Err(Error::Validation(format!(
                "parameter ${position}: unsupported parameter type {}",
                ty.name()
            )))
        }
    };
    Ok(param)
}

fn as_i64(value: &Scalar) -> Option<i64> {
    match value {
        Scalar::Int(i) => Some(*i),
        Scalar::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
        Scalar::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Int(i) => Some(*i as f64),
        Scalar::Float(f) => Some(*f),
        Scalar::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// RFC 3339 with offset; a value without offset is taken as UTC.
fn parse_datetime_utc(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_naive_datetime(s).map(|naive| naive.and_utc()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert one row into a JSON object keyed by column name.
pub fn row_to_json(row: &Row) -> Map<String, Value> {
    let mut out = Map::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match cell_to_json(row, idx, column.type_()) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    column = column.name(),
                    pg_type = column.type_().name(),
                    error = %e,
                    "could not decode column, returning null"
                );
                Value::Null
            }
        };
        out.insert(column.name().to_string(), value);
    }
    out
}

fn opt<T: Into<Value>>(v: Option<T>) -> Value {
    v.map_or(Value::Null, Into::into)
}

fn cell_to_json(row: &Row, idx: usize, ty: &Type) -> std::result::Result<Value, BoxError> {
    if let Kind::Enum(_) = ty.kind() {
        return Ok(opt(row.try_get::<_, Option<EnumLabel>>(idx)?.map(|l| l.0)));
    }

    let value = match *ty {
        Type::BOOL => opt(row.try_get::<_, Option<bool>>(idx)?),
        Type::INT2 => opt(row.try_get::<_, Option<i16>>(idx)?),
        Type::INT4 => opt(row.try_get::<_, Option<i32>>(idx)?),
        Type::INT8 => opt(row.try_get::<_, Option<i64>>(idx)?),
        Type::OID => opt(row.try_get::<_, Option<u32>>(idx)?),
        Type::FLOAT4 => float(row.try_get::<_, Option<f32>>(idx)?.map(f64::from)),
        Type::FLOAT8 => float(row.try_get::<_, Option<f64>>(idx)?),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumeric>>(idx)?
            .map_or(Value::Null, |n| n.to_json()),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            opt(row.try_get::<_, Option<String>>(idx)?)
        }
        Type::UUID => opt(row.try_get::<_, Option<uuid::Uuid>>(idx)?.map(|u| u.to_string())),
        Type::TIMESTAMP => opt(
            row.try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        ),
        Type::TIMESTAMPTZ => opt(
            row.try_get::<_, Option<DateTime<Utc>>>(idx)?
                .map(|t| t.to_rfc3339()),
        ),
        Type::DATE => opt(row.try_get::<_, Option<NaiveDate>>(idx)?.map(|d| d.to_string())),
        Type::TIME => opt(row.try_get::<_, Option<NaiveTime>>(idx)?.map(|t| t.to_string())),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?.unwrap_or(Value::Null),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            opt(row.try_get::<_, Option<Vec<Option<String>>>>(idx)?)
        }
        Type::INT4_ARRAY => opt(row.try_get::<_, Option<Vec<Option<i32>>>>(idx)?),
        Type::INT8_ARRAY => opt(row.try_get::<_, Option<Vec<Option<i64>>>>(idx)?),
        _ => return Err(format!("unsupported column type {}", ty.name()).into()),
    };
    Ok(value)
}

fn float(v: Option<f64>) -> Value {
    v.and_then(Number::from_f64).map_or(Value::Null, Value::Number)
}
