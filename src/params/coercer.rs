//! Best-effort widening coercion from caller arguments to a declared
//! parameter-type vector (spec §4.1).

use rust_decimal::Decimal;

use crate::error::ProcedureError;

use super::{CallerArg, SqlType, SqlValue};

pub struct ParameterCoercer;

impl ParameterCoercer {
    /// Coerce `args` against `target_types`. If `sysproc_context` is
    /// `Some`, it is prepended to `args` before arity is checked (spec
    /// §4.1 "System-procedure injection").
    pub fn coerce(
        target_types: &[SqlType],
        args: &[CallerArg],
        sysproc_context: Option<CallerArg>,
    ) -> Result<Vec<SqlValue>, ProcedureError> {
        let effective: Vec<CallerArg> = match sysproc_context {
            Some(ctx) => std::iter::once(ctx).chain(args.iter().cloned()).collect(),
            None => args.to_vec(),
        };

        if effective.len() != target_types.len() {
            return Err(ProcedureError::ArityMismatch {
                expected: target_types.len(),
                received: effective.len(),
            });
        }

        target_types
            .iter()
            .zip(effective.into_iter())
            .enumerate()
            .map(|(index, (target, arg))| coerce_one(index, *target, arg))
            .collect()
    }
}

fn coerce_one(index: usize, target: SqlType, arg: CallerArg) -> Result<SqlValue, ProcedureError> {
    if matches!(arg, CallerArg::Null) {
        return SqlValue::null_for(target).ok_or(ProcedureError::UnknownTypeForNull { index });
    }

    let widened = match (target, &arg) {
        (SqlType::TinyInt, CallerArg::TinyInt(v)) => Some(SqlValue::TinyInt(*v)),
        (SqlType::SmallInt, _) => as_i64(&arg).and_then(|v| i16::try_from(v).ok()).map(SqlValue::SmallInt),
        (SqlType::TinyInt, _) => as_i64(&arg).and_then(|v| i8::try_from(v).ok()).map(SqlValue::TinyInt),
        (SqlType::Integer, _) => as_i64(&arg).and_then(|v| i32::try_from(v).ok()).map(SqlValue::Integer),
        (SqlType::BigInt, _) => as_i64(&arg).map(SqlValue::BigInt),
        (SqlType::Float, CallerArg::Float(v)) => Some(SqlValue::Float(*v)),
        (SqlType::Float, _) => as_i64(&arg).map(|v| SqlValue::Float(v as f64)),
        (SqlType::Timestamp, CallerArg::Timestamp(v)) => Some(SqlValue::Timestamp(*v)),
        (SqlType::Timestamp, CallerArg::BigInt(v)) => Some(SqlValue::Timestamp(*v)),
        (SqlType::String, CallerArg::String(v)) => Some(SqlValue::String(Some(v.clone()))),
        (SqlType::VarBinary, CallerArg::VarBinary(v)) => Some(SqlValue::VarBinary(Some(v.clone()))),
        (SqlType::Decimal, CallerArg::Decimal(v)) => Some(SqlValue::Decimal(Some(*v))),
        (SqlType::Decimal, _) => as_i64(&arg).map(|v| SqlValue::Decimal(Some(Decimal::from(v)))),
        (SqlType::Numeric, _) => None,
        _ => None,
    };

    widened.ok_or_else(|| ProcedureError::TypeError {
        index,
        reason: format!("cannot coerce {arg:?} to {target:?}"),
    })
}

fn as_i64(arg: &CallerArg) -> Option<i64> {
    match arg {
        CallerArg::TinyInt(v) => Some(*v as i64),
        CallerArg::SmallInt(v) => Some(*v as i64),
        CallerArg::Integer(v) => Some(*v as i64),
        CallerArg::BigInt(v) => Some(*v),
        CallerArg::Timestamp(v) => Some(*v),
        _ => None,
    }
}
