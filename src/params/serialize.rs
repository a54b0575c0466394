//! Canonical little-endian serialization of a coerced parameter set (spec
//! §4.2, §6 "Determinism hash"). This is the byte buffer that is memoized
//! on a Queued Statement and fed to both the determinism accumulator and
//! the dispatch path.

use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rust_decimal::Decimal;

use crate::error::ProcedureError;

use super::SqlValue;

const TAG_TINYINT: u8 = 0;
const TAG_SMALLINT: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_BIGINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_TIMESTAMP: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_VARBINARY: u8 = 7;
const TAG_DECIMAL: u8 = 8;

const PRESENT: u8 = 1;
const ABSENT: u8 = 0;

/// Serialize a coerced parameter set in little-endian canonical order.
/// Reused verbatim for dispatch and for determinism hashing (spec §4.2
/// "For a non-read-only statement, the serialized params are computed
/// exactly once and reused").
pub fn serialize_params(values: &[SqlValue]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(values.len() as u32);
    for value in values {
        match value {
            SqlValue::TinyInt(v) => {
                buf.put_u8(TAG_TINYINT);
                buf.put_i8(*v);
            }
            SqlValue::SmallInt(v) => {
                buf.put_u8(TAG_SMALLINT);
                buf.put_i16_le(*v);
            }
            SqlValue::Integer(v) => {
                buf.put_u8(TAG_INTEGER);
                buf.put_i32_le(*v);
            }
            SqlValue::BigInt(v) => {
                buf.put_u8(TAG_BIGINT);
                buf.put_i64_le(*v);
            }
            SqlValue::Float(v) => {
                buf.put_u8(TAG_FLOAT);
                buf.put_u64_le(v.to_bits());
            }
            SqlValue::Timestamp(v) => {
                buf.put_u8(TAG_TIMESTAMP);
                buf.put_i64_le(*v);
            }
            SqlValue::String(v) => put_optional_bytes(&mut buf, TAG_STRING, v.as_ref().map(|s| s.as_bytes())),
            SqlValue::VarBinary(v) => put_optional_bytes(&mut buf, TAG_VARBINARY, v.as_deref()),
            SqlValue::Decimal(v) => {
                put_optional_bytes(&mut buf, TAG_DECIMAL, v.as_ref().map(|d| d.to_string()).as_deref().map(str::as_bytes))
            }
        }
    }
    buf.freeze()
}

fn put_optional_bytes(buf: &mut BytesMut, tag: u8, data: Option<&[u8]>) {
    buf.put_u8(tag);
    match data {
        Some(bytes) => {
            buf.put_u8(PRESENT);
            buf.put_u32_le(bytes.len() as u32);
            buf.put_slice(bytes);
        }
        None => buf.put_u8(ABSENT),
    }
}

/// Inverse of [`serialize_params`]; used by round-trip tests and by
/// diagnostic tooling. Not on the hot dispatch path.
pub fn deserialize_params(mut buf: Bytes) -> Result<Vec<SqlValue>, ProcedureError> {
    let count = read_u32(&mut buf)? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = read_u8(&mut buf)?;
        let value = match tag {
            TAG_TINYINT => SqlValue::TinyInt(read_u8(&mut buf)? as i8),
            TAG_SMALLINT => SqlValue::SmallInt(read_i16(&mut buf)?),
            TAG_INTEGER => SqlValue::Integer(read_i32(&mut buf)?),
            TAG_BIGINT => SqlValue::BigInt(read_i64(&mut buf)?),
            TAG_FLOAT => SqlValue::Float(f64::from_bits(read_u64(&mut buf)?)),
            TAG_TIMESTAMP => SqlValue::Timestamp(read_i64(&mut buf)?),
            TAG_STRING => {
                SqlValue::String(read_optional_bytes(&mut buf)?.map(|b| String::from_utf8_lossy(&b).into_owned()))
            }
            TAG_VARBINARY => SqlValue::VarBinary(read_optional_bytes(&mut buf)?),
            TAG_DECIMAL => SqlValue::Decimal(
                read_optional_bytes(&mut buf)?
                    .map(|b| Decimal::from_str(&String::from_utf8_lossy(&b)))
                    .transpose()
                    .map_err(|e| ProcedureError::unexpected(format!("bad decimal bytes: {e}")))?,
            ),
            other => return Err(ProcedureError::unexpected(format!("unknown param tag {other}"))),
        };
        out.push(value);
    }
    Ok(out)
}

fn read_u8(buf: &mut Bytes) -> Result<u8, ProcedureError> {
    if buf.remaining() < 1 {
        return Err(ProcedureError::unexpected("truncated parameter buffer"));
    }
    Ok(buf.get_u8())
}

fn read_i16(buf: &mut Bytes) -> Result<i16, ProcedureError> {
    if buf.remaining() < 2 {
        return Err(ProcedureError::unexpected("truncated parameter buffer"));
    }
    Ok(buf.get_i16_le())
}

fn read_i32(buf: &mut Bytes) -> Result<i32, ProcedureError> {
    if buf.remaining() < 4 {
        return Err(ProcedureError::unexpected("truncated parameter buffer"));
    }
    Ok(buf.get_i32_le())
}

fn read_u32(buf: &mut Bytes) -> Result<u32, ProcedureError> {
    if buf.remaining() < 4 {
        return Err(ProcedureError::unexpected("truncated parameter buffer"));
    }
    Ok(buf.get_u32_le())
}

fn read_i64(buf: &mut Bytes) -> Result<i64, ProcedureError> {
    if buf.remaining() < 8 {
        return Err(ProcedureError::unexpected("truncated parameter buffer"));
    }
    Ok(buf.get_i64_le())
}

fn read_u64(buf: &mut Bytes) -> Result<u64, ProcedureError> {
    if buf.remaining() < 8 {
        return Err(ProcedureError::unexpected("truncated parameter buffer"));
    }
    Ok(buf.get_u64_le())
}

fn read_optional_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, ProcedureError> {
    let present = read_u8(buf)?;
    if present == ABSENT {
        return Ok(None);
    }
    let len = read_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(ProcedureError::unexpected("truncated parameter buffer"));
    }
    Ok(Some(buf.copy_to_bytes(len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_type_including_nulls() {
        let values = vec![
            SqlValue::TinyInt(-5),
            SqlValue::SmallInt(1234),
            SqlValue::Integer(-99999),
            SqlValue::BigInt(i64::MAX),
            SqlValue::Float(3.5),
            SqlValue::Timestamp(1_700_000_000_000_000),
            SqlValue::String(Some("hello".into())),
            SqlValue::String(None),
            SqlValue::VarBinary(Some(vec![1, 2, 3])),
            SqlValue::VarBinary(None),
            SqlValue::Decimal(Some(Decimal::new(12345, 2))),
            SqlValue::Decimal(None),
        ];
        let bytes = serialize_params(&values);
        let round_tripped = deserialize_params(bytes).unwrap();
        assert_eq!(values, round_tripped);
    }

    #[test]
    fn serialization_is_deterministic_for_identical_inputs() {
        let values = vec![SqlValue::BigInt(7), SqlValue::String(Some("a".into()))];
        assert_eq!(serialize_params(&values), serialize_params(&values));
    }
}
