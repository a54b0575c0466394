//! Fast Path: single-partition dispatch of a sub-batch in one engine call
//! (spec §4.5, §4.1 module list item 6).

use crate::error::ProcedureError;
use crate::ports::{ParamPayload, SiteExecutionContext};
use crate::queued_statement::QueuedStatement;
use crate::statement::ResultTable;
use crate::types::{FragmentId, TxnHandle};

pub struct FastPathExecutor;

impl FastPathExecutor {
    /// Packs the sub-batch into parallel arrays of aggregator fragment ids
    /// and parameter payloads, then dispatches in a single engine call.
    /// Writes reuse their memoized serialized params; reads are passed raw
    /// (spec §4.5).
    pub async fn execute(
        sub_batch: &mut [QueuedStatement],
        txn: &TxnHandle,
        read_only_call: bool,
        site: &dyn SiteExecutionContext,
    ) -> Result<Vec<ResultTable>, ProcedureError> {
        let mut fragment_ids: Vec<FragmentId> = Vec::with_capacity(sub_batch.len());
        let mut params: Vec<ParamPayload> = Vec::with_capacity(sub_batch.len());

        for stmt in sub_batch.iter_mut() {
            fragment_ids.push(stmt.descriptor.aggregator.id);
            if stmt.descriptor.read_only {
                params.push(ParamPayload::Raw(stmt.params.clone()));
            } else {
                params.push(ParamPayload::Serialized(stmt.serialized_params().clone()));
            }
        }

        site.execute_plan_fragments(
            txn.effective_txn_id(),
            txn.effective_sp_handle(),
            txn.effective_unique_id().0,
            read_only_call,
            &fragment_ids,
            &params,
        )
        .await
        .map_err(ProcedureError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::error::EngineError;
    use crate::params::{SqlType, SqlValue};
    use crate::statement::StatementDescriptor;
    use crate::types::{Fragment, PlanHash, UniqueId};

    struct FakeSite;

    #[async_trait]
    impl SiteExecutionContext for FakeSite {
        async fn execute_plan_fragments(
            &self,
            _txn_id: i64,
            _sp_handle: i64,
            _unique_id: i64,
            _read_only: bool,
            fragments: &[FragmentId],
            _params: &[ParamPayload],
        ) -> Result<Vec<ResultTable>, EngineError> {
            Ok(fragments.iter().map(|_| ResultTable::new(vec![vec![SqlValue::BigInt(1)]])).collect())
        }

        async fn load_table(
            &self,
            _cluster: &str,
            _database: &str,
            _table: &str,
            _data: Bytes,
            _return_unique_violations: bool,
            _should_dr_stream: bool,
        ) -> Result<Option<Bytes>, EngineError> {
            Ok(None)
        }
    }

    fn descriptor(read_only: bool) -> Arc<StatementDescriptor> {
        Arc::new(StatementDescriptor::new(
            "INSERT INTO t VALUES (?)",
            Fragment {
                id: FragmentId(1),
                plan_hash: PlanHash::ZERO,
                is_transactional: true,
            },
            None,
            vec![SqlType::BigInt],
            read_only,
            false,
        ))
    }

    #[tokio::test]
    async fn dispatches_one_call_for_whole_sub_batch() {
        let site = FakeSite;
        let txn = TxnHandle::new(1, 1, UniqueId(1));
        let mut batch = vec![
            QueuedStatement::new(descriptor(false), vec![SqlValue::BigInt(7)], None),
            QueuedStatement::new(descriptor(true), vec![SqlValue::BigInt(8)], None),
        ];
        let results = FastPathExecutor::execute(&mut batch, &txn, false, &site).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn write_statements_reuse_memoized_serialization() {
        let site = FakeSite;
        let txn = TxnHandle::new(1, 1, UniqueId(1));
        let mut batch = vec![QueuedStatement::new(descriptor(false), vec![SqlValue::BigInt(7)], None)];
        // Pre-populate the memo as the determinism accumulator would.
        let _ = batch[0].serialized_params();
        assert!(batch[0].has_serialized_params());
        FastPathExecutor::execute(&mut batch, &txn, false, &site).await.unwrap();
        assert!(batch[0].has_serialized_params());
    }
}
