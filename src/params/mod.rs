//! Parameter types, the canonical value representation, and the coercer
//! that turns caller-supplied argument vectors into it (spec §4.1).

mod coercer;
mod serialize;

pub use coercer::ParameterCoercer;
pub use serialize::{deserialize_params, serialize_params};

use rust_decimal::Decimal;

/// Declared parameter type of a Statement Descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Timestamp,
    String,
    VarBinary,
    Decimal,
    /// Unconstrained numeric literal type seen only in a freshly-parsed
    /// declared parameter vector, before install-time widening folds it
    /// into `Float` (spec §4.1 "Widening at compile-install time").
    Numeric,
}

/// Canonical, type-checked value produced by the coercer. NULL is
/// represented the way the spec's testable property #6 demands for every
/// type it names a literal sentinel for; for STRING/VARBINARY/DECIMAL the
/// "designated NULL marker" is rendered as `None`, the idiomatic form of an
/// explicit marker value in Rust.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f64),
    /// Microseconds since the epoch.
    Timestamp(i64),
    String(Option<String>),
    VarBinary(Option<Vec<u8>>),
    Decimal(Option<Decimal>),
}

pub const TINYINT_NULL: i8 = i8::MIN;
pub const SMALLINT_NULL: i16 = i16::MIN;
pub const INTEGER_NULL: i32 = i32::MIN;
pub const BIGINT_NULL: i64 = i64::MIN;
pub const TIMESTAMP_NULL: i64 = i64::MIN;

/// Bit pattern VoltDB-style engines use to mark a null float: a quiet NaN
/// distinguishable from a NaN arising from arithmetic.
pub const FLOAT_NULL_BITS: u64 = 0xFFF8_0000_0000_0000;

pub fn float_null() -> f64 {
    f64::from_bits(FLOAT_NULL_BITS)
}

pub fn is_float_null(v: f64) -> bool {
    v.to_bits() == FLOAT_NULL_BITS
}

impl SqlValue {
    /// The type-specific NULL sentinel for `t` (spec §4.1 rule table).
    /// Returns `None` only for types that have no NULL representation
    /// (there are none in the closed type list above).
    pub fn null_for(t: SqlType) -> Option<SqlValue> {
        match t {
            SqlType::TinyInt => Some(SqlValue::TinyInt(TINYINT_NULL)),
            SqlType::SmallInt => Some(SqlValue::SmallInt(SMALLINT_NULL)),
            SqlType::Integer => Some(SqlValue::Integer(INTEGER_NULL)),
            SqlType::BigInt => Some(SqlValue::BigInt(BIGINT_NULL)),
            SqlType::Float => Some(SqlValue::Float(float_null())),
            SqlType::Timestamp => Some(SqlValue::Timestamp(TIMESTAMP_NULL)),
            SqlType::String => Some(SqlValue::String(None)),
            SqlType::VarBinary => Some(SqlValue::VarBinary(None)),
            SqlType::Decimal => Some(SqlValue::Decimal(None)),
            SqlType::Numeric => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::TinyInt(v) => *v == TINYINT_NULL,
            SqlValue::SmallInt(v) => *v == SMALLINT_NULL,
            SqlValue::Integer(v) => *v == INTEGER_NULL,
            SqlValue::BigInt(v) => *v == BIGINT_NULL,
            SqlValue::Float(v) => is_float_null(*v),
            SqlValue::Timestamp(v) => *v == TIMESTAMP_NULL,
            SqlValue::String(v) => v.is_none(),
            SqlValue::VarBinary(v) => v.is_none(),
            SqlValue::Decimal(v) => v.is_none(),
        }
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlValue::TinyInt(_) => SqlType::TinyInt,
            SqlValue::SmallInt(_) => SqlType::SmallInt,
            SqlValue::Integer(_) => SqlType::Integer,
            SqlValue::BigInt(_) => SqlType::BigInt,
            SqlValue::Float(_) => SqlType::Float,
            SqlValue::Timestamp(_) => SqlType::Timestamp,
            SqlValue::String(_) => SqlType::String,
            SqlValue::VarBinary(_) => SqlType::VarBinary,
            SqlValue::Decimal(_) => SqlType::Decimal,
        }
    }
}

/// A single caller-supplied argument, before coercion against a target
/// type. `Null` is explicit here because the caller does not know the
/// target type's sentinel encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum CallerArg {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f64),
    Timestamp(i64),
    String(String),
    VarBinary(Vec<u8>),
    Decimal(Decimal),
}

/// Install-time rewrite of a declared parameter-type vector for
/// single-statement procedures (spec §4.1 "Widening at compile-install
/// time"): narrow integer types promote to BIGINT, NUMERIC promotes to
/// FLOAT. This is not invoked per call.
pub fn widen_declared_types(types: &mut [SqlType]) {
    for t in types.iter_mut() {
        *t = match t {
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer => SqlType::BigInt,
            SqlType::Numeric => SqlType::Float,
            other => *other,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinels_round_trip_is_null() {
        for t in [
            SqlType::TinyInt,
            SqlType::SmallInt,
            SqlType::Integer,
            SqlType::BigInt,
            SqlType::Float,
            SqlType::Timestamp,
            SqlType::String,
            SqlType::VarBinary,
            SqlType::Decimal,
        ] {
            let v = SqlValue::null_for(t).unwrap();
            assert!(v.is_null(), "{t:?} null sentinel should report is_null");
        }
    }

    #[test]
    fn widen_promotes_narrow_ints_and_numeric() {
        let mut types = vec![SqlType::TinyInt, SqlType::SmallInt, SqlType::Integer, SqlType::Numeric, SqlType::String];
        widen_declared_types(&mut types);
        assert_eq!(
            types,
            vec![SqlType::BigInt, SqlType::BigInt, SqlType::BigInt, SqlType::Float, SqlType::String]
        );
    }

    #[test]
    fn ordinary_values_are_not_null() {
        assert!(!SqlValue::BigInt(0).is_null());
        assert!(!SqlValue::Float(0.0).is_null());
        assert!(!SqlValue::String(Some("x".into())).is_null());
    }
}
