//! Statement Descriptor: an immutable, post-compile description of one SQL
//! statement (spec §3, §4.1 module list item 1).

use std::sync::Arc;

use crate::params::{SqlType, SqlValue};
use crate::types::Fragment;

/// A post-compile, immutable description of one SQL statement. Created
/// when a procedure is installed and retained for the life of the catalog
/// generation; never mutated afterward. Shared (never owned) by every
/// Queued Statement that references it.
#[derive(Debug, Clone)]
pub struct StatementDescriptor {
    pub sql_text: Arc<str>,
    pub aggregator: Fragment,
    pub collector: Option<Fragment>,
    pub param_types: Arc<[SqlType]>,
    pub read_only: bool,
    /// True if this statement performs DML against a replicated table,
    /// which forces it onto the slow path's local-fragment handling even
    /// when the surrounding procedure is single-partition.
    pub replicated_table_dml: bool,
    /// Plain CRC32 of `sql_text`, computed once at construction and reused
    /// by the determinism accumulator (spec §4.2) — distinct from the
    /// CRC32C used for the accumulator itself.
    pub sql_crc: u32,
    /// Full plan bytes for the aggregator, present only for a custom
    /// (ad-hoc, non-cataloged) fragment that must be submitted alongside
    /// its hash at dispatch time (spec §4.6 "Custom fragments"). `None` for
    /// every cataloged statement, which the engine already has by hash.
    pub aggregator_plan_bytes: Option<bytes::Bytes>,
    /// Same as `aggregator_plan_bytes`, for the collector fragment.
    pub collector_plan_bytes: Option<bytes::Bytes>,
}

impl StatementDescriptor {
    pub fn new(
        sql_text: impl Into<Arc<str>>,
        aggregator: Fragment,
        collector: Option<Fragment>,
        param_types: impl Into<Arc<[SqlType]>>,
        read_only: bool,
        replicated_table_dml: bool,
    ) -> Self {
        let sql_text = sql_text.into();
        let sql_crc = crc32fast::hash(sql_text.as_bytes());
        Self {
            sql_text,
            aggregator,
            collector,
            param_types: param_types.into(),
            read_only,
            replicated_table_dml,
            sql_crc,
            aggregator_plan_bytes: None,
            collector_plan_bytes: None,
        }
    }

    /// Attach custom (ad-hoc, non-cataloged) plan bytes so the slow path
    /// submits them alongside the plan hash rather than assuming the engine
    /// already has this plan cataloged (spec §4.6 "Custom fragments").
    pub fn with_custom_plan_bytes(mut self, aggregator: Option<bytes::Bytes>, collector: Option<bytes::Bytes>) -> Self {
        self.aggregator_plan_bytes = aggregator;
        self.collector_plan_bytes = collector;
        self
    }

    /// Whether this statement's execution plan is split across a collector
    /// and aggregator, requiring the slow path even within an otherwise
    /// single-partition procedure.
    pub fn is_two_fragment(&self) -> bool {
        self.collector.is_some()
    }
}

/// A lightweight post-condition on a statement's result row count (spec
/// §4.4 "Post-dispatch").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    ExactlyOneRow,
    ExactlyNRows(i64),
    AtLeastOneRow,
    ZeroOrOneRow,
    NonNegativeRowsAffected,
    FailRowsAffected,
}

impl Expectation {
    /// `true` if `row_count` satisfies this expectation.
    pub fn check(&self, row_count: i64) -> bool {
        match self {
            Expectation::ExactlyOneRow => row_count == 1,
            Expectation::ExactlyNRows(n) => row_count == *n,
            Expectation::AtLeastOneRow => row_count >= 1,
            Expectation::ZeroOrOneRow => row_count == 0 || row_count == 1,
            Expectation::NonNegativeRowsAffected => row_count >= 0,
            Expectation::FailRowsAffected => row_count < 0,
        }
    }
}

/// A single result table: the row count plus its rows in the canonical
/// value representation. The runner treats the contents as opaque beyond
/// row count for expectation checking and response assembly; actual row
/// data comes from the external execution engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultTable {
    pub fn new(rows: Vec<Vec<SqlValue>>) -> Self {
        Self { rows }
    }

    pub fn row_count(&self) -> i64 {
        self.rows.len() as i64
    }
}

/// Re-hash a response's result tables for the replicated-invocation
/// comparison path (spec §4.2 "Publication"): a replica replaying a
/// primary's execution returns this hash instead of the tables themselves,
/// so two replicas can cheaply confirm they produced identical results
/// without shipping the rows over the wire a second time.
pub fn hash_result_tables(tables: &[ResultTable]) -> u32 {
    let mut crc = 0u32;
    for table in tables {
        for row in &table.rows {
            let bytes = crate::params::serialize_params(row);
            crc = crc32c::crc32c_append(crc, &bytes);
        }
        // Separates tables with differing row counts that would otherwise
        // serialize to the same byte stream (e.g. one empty table vs. two
        // tables where the first absorbs the second's first row).
        crc = crc32c::crc32c_append(crc, &(table.rows.len() as u32).to_le_bytes());
    }
    crc
}
