//! Queued Statement: a statement descriptor bound to a concrete parameter
//! set plus optional expectation and memoized serialized-params buffer
//! (spec §3, §4.1 module list item 3).

use std::sync::Arc;

use bytes::Bytes;

use crate::error::ProcedureError;
use crate::params::{serialize_params, SqlValue};
use crate::statement::{Expectation, StatementDescriptor};

/// A coerced parameter set bound to a shared statement descriptor.
/// Destroyed at batch clearance; never outlives the invocation that
/// created it.
#[derive(Debug, Clone)]
pub struct QueuedStatement {
    pub descriptor: Arc<StatementDescriptor>,
    pub params: Vec<SqlValue>,
    pub expectation: Option<Expectation>,
    /// Populated lazily the first time this statement's parameters are
    /// serialized (by the determinism accumulator for writes, or by the
    /// dispatch path if the accumulator never ran over it), then reused —
    /// the serialization is never recomputed (spec §4.2, invariant: "the
    /// serialized params are computed exactly once and reused").
    serialized_params: Option<Bytes>,
}

impl QueuedStatement {
    pub fn new(descriptor: Arc<StatementDescriptor>, params: Vec<SqlValue>, expectation: Option<Expectation>) -> Self {
        Self {
            descriptor,
            params,
            expectation,
            serialized_params: None,
        }
    }

    /// The memoized serialized parameter buffer, computing and caching it
    /// on first access.
    pub fn serialized_params(&mut self) -> &Bytes {
        if self.serialized_params.is_none() {
            self.serialized_params = Some(serialize_params(&self.params));
        }
        self.serialized_params.as_ref().expect("just populated")
    }

    pub fn has_serialized_params(&self) -> bool {
        self.serialized_params.is_some()
    }

    /// Evaluate this statement's expectation (if any) against an observed
    /// result row count.
    pub fn check_expectation(&self, index: usize, row_count: i64) -> Result<(), ProcedureError> {
        match self.expectation {
            Some(exp) if !exp.check(row_count) => Err(ProcedureError::ExpectationMismatch { index }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SqlType;
    use crate::types::{Fragment, FragmentId, PlanHash};

    fn descriptor() -> Arc<StatementDescriptor> {
        Arc::new(StatementDescriptor::new(
            "INSERT INTO t VALUES (?)",
            Fragment {
                id: FragmentId(1),
                plan_hash: PlanHash::ZERO,
                is_transactional: true,
            },
            None,
            vec![SqlType::BigInt],
            false,
            false,
        ))
    }

    #[test]
    fn serialized_params_are_memoized() {
        let mut qs = QueuedStatement::new(descriptor(), vec![SqlValue::BigInt(7)], None);
        assert!(!qs.has_serialized_params());
        let first = qs.serialized_params().clone();
        let second = qs.serialized_params().clone();
        assert_eq!(first, second);
        assert!(qs.has_serialized_params());
    }

    #[test]
    fn expectation_mismatch_names_index() {
        let qs = QueuedStatement::new(descriptor(), vec![SqlValue::BigInt(7)], Some(Expectation::ExactlyOneRow));
        assert!(qs.check_expectation(3, 1).is_ok());
        let err = qs.check_expectation(3, 0).unwrap_err();
        assert!(matches!(err, ProcedureError::ExpectationMismatch { index: 3 }));
    }

    #[test]
    fn no_expectation_always_passes() {
        let qs = QueuedStatement::new(descriptor(), vec![SqlValue::BigInt(7)], None);
        assert!(qs.check_expectation(0, 0).is_ok());
        assert!(qs.check_expectation(0, 1000).is_ok());
    }
}
