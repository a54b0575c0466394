//! Batch Executor: splits the pending queue into bounded sub-batches,
//! dispatches each via the fast or slow path (or a test-mode reference
//! backend), and concatenates results (spec §4.4, §4.1 module list item
//! 5).

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{EngineError, ProcedureError};
use crate::fast_path::FastPathExecutor;
use crate::params::SqlValue;
use crate::ports::{FragmentCoordinator, SiteExecutionContext};
use crate::queued_statement::QueuedStatement;
use crate::slow_path::SlowPathExecutor;
use crate::statement::ResultTable;
use crate::types::TxnHandle;

/// An embedded SQL reference implementation the executor dispatches to
/// directly when configured, bypassing the fast/slow path split entirely
/// (spec §4.4 "An HSQL-backed test mode, if configured, short-circuits").
#[async_trait]
pub trait ReferenceBackend: Send + Sync {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ResultTable, EngineError>;
}

/// RAII guard draining the pending queue on drop, guaranteeing it is empty
/// after `execute` returns regardless of success or failure (spec §8
/// invariant #9: "On any exception, pending queue is empty after
/// return.").
struct QueueClearGuard<'a> {
    queue: &'a mut Vec<QueuedStatement>,
}

impl<'a> QueueClearGuard<'a> {
    fn new(queue: &'a mut Vec<QueuedStatement>) -> Self {
        Self { queue }
    }
}

impl Drop for QueueClearGuard<'_> {
    fn drop(&mut self) {
        self.queue.clear();
    }
}

pub struct BatchExecutor;

impl BatchExecutor {
    /// Flush the pending queue, returning results aligned to queueing
    /// order. Statements queued after this call returns are independent
    /// (spec §4.4).
    #[instrument(skip_all, fields(is_final, queue_len = queue.len()))]
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        queue: &mut Vec<QueuedStatement>,
        seen_final_batch: &mut bool,
        batch_index: &mut i64,
        is_final: bool,
        single_partition: bool,
        procedure_read_only: bool,
        max_batch_size: usize,
        txn: &TxnHandle,
        site: &dyn SiteExecutionContext,
        coordinator: &dyn FragmentCoordinator,
        reference_backend: Option<&dyn ReferenceBackend>,
    ) -> Result<Vec<ResultTable>, ProcedureError> {
        if *seen_final_batch {
            return Err(ProcedureError::DoubleFinalBatch);
        }
        *seen_final_batch = is_final;
        *batch_index += 1;

        let mut guard = QueueClearGuard::new(queue);
        let result = Self::dispatch(
            &mut *guard.queue,
            is_final,
            single_partition,
            procedure_read_only,
            max_batch_size,
            txn,
            site,
            coordinator,
            reference_backend,
        )
        .await;
        drop(guard);
        result
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all)]
    async fn dispatch(
        queue: &mut Vec<QueuedStatement>,
        is_final: bool,
        single_partition: bool,
        procedure_read_only: bool,
        max_batch_size: usize,
        txn: &TxnHandle,
        site: &dyn SiteExecutionContext,
        coordinator: &dyn FragmentCoordinator,
        reference_backend: Option<&dyn ReferenceBackend>,
    ) -> Result<Vec<ResultTable>, ProcedureError> {
        let total = queue.len();
        let mut results: Vec<ResultTable> = Vec::with_capacity(total);
        let mut remaining = total;

        while remaining > 0 {
            let take = max_batch_size.min(remaining);
            let final_sub_batch = is_final && take == remaining;
            let mut sub_batch: Vec<QueuedStatement> = queue.drain(0..take).collect();

            debug!(take, final_sub_batch, "dispatching sub-batch");

            let sub_results = if let Some(backend) = reference_backend {
                Self::dispatch_reference(&sub_batch, backend).await?
            } else if single_partition
                && sub_batch
                    .iter()
                    .all(|s| s.descriptor.collector.is_none() && !s.descriptor.replicated_table_dml)
            {
                FastPathExecutor::execute(&mut sub_batch, txn, procedure_read_only, site).await?
            } else {
                SlowPathExecutor::execute(&mut sub_batch, txn, coordinator, final_sub_batch).await?
            };

            if sub_results.len() != sub_batch.len() {
                return Err(ProcedureError::unexpected(format!(
                    "dispatch returned {} results for {} statements",
                    sub_results.len(),
                    sub_batch.len()
                )));
            }

            let base_index = results.len();
            for (offset, (stmt, table)) in sub_batch.iter().zip(sub_results.iter()).enumerate() {
                stmt.check_expectation(base_index + offset, table.row_count())?;
            }

            results.extend(sub_results);
            remaining -= take;
        }

        Ok(results)
    }

    async fn dispatch_reference(
        sub_batch: &[QueuedStatement],
        backend: &dyn ReferenceBackend,
    ) -> Result<Vec<ResultTable>, ProcedureError> {
        let mut out = Vec::with_capacity(sub_batch.len());
        for stmt in sub_batch {
            let table = backend
                .execute(&stmt.descriptor.sql_text, &stmt.params)
                .await
                .map_err(ProcedureError::from)?;
            out.push(table);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::params::SqlType;
    use crate::ports::ParamPayload;
    use crate::statement::StatementDescriptor;
    use crate::types::{DependencyId, Fragment, FragmentId, PlanHash, UniqueId};

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

    struct FakeCoordinator;

    #[async_trait]
    impl FragmentCoordinator for FakeCoordinator {
        fn register_dependencies(&self, _txn_id: i64, _deps: &[DependencyId]) {}
        fn install_local_work(&self, _txn_id: i64, _message: crate::slow_path::LocalFragmentMessage, _non_transactional: bool) {}
        fn install_distributed_work(&self, _txn_id: i64, _message: crate::slow_path::DistributedFragmentMessage) {}
        async fn recursable_run(&self, _txn_id: i64) -> Result<HashMap<DependencyId, ResultTable>, EngineError> {
            unreachable!("fast path test should never reach the coordinator")
        }
    }

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

    #[tokio::test]
    async fn double_final_batch_fails_without_touching_queue() {
        let site = FakeSite;
        let coordinator = FakeCoordinator;
        let txn = TxnHandle::new(1, 1, UniqueId(1));
        let mut queue = vec![QueuedStatement::new(descriptor(), vec![SqlValue::BigInt(1)], None)];
        let mut seen_final = true;
        let mut batch_index = 0i64;
        let err = BatchExecutor::execute(
            &mut queue, &mut seen_final, &mut batch_index, false, true, false, 200, &txn, &site, &coordinator, None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcedureError::DoubleFinalBatch));
    }

    #[tokio::test]
    async fn queue_is_always_cleared_after_execute() {
        let site = FakeSite;
        let coordinator = FakeCoordinator;
        let txn = TxnHandle::new(1, 1, UniqueId(1));
        let mut queue = vec![QueuedStatement::new(descriptor(), vec![SqlValue::BigInt(1)], None)];
        let mut seen_final = false;
        let mut batch_index = 0i64;
        let _ = BatchExecutor::execute(
            &mut queue, &mut seen_final, &mut batch_index, true, true, false, 200, &txn, &site, &coordinator, None,
        )
        .await
        .unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn oversize_batch_splits_into_sub_batches_preserving_order() {
        let site = FakeSite;
        let coordinator = FakeCoordinator;
        let txn = TxnHandle::new(1, 1, UniqueId(1));
        let mut queue: Vec<QueuedStatement> = (0..450)
            .map(|i| QueuedStatement::new(descriptor(), vec![SqlValue::BigInt(i)], None))
            .collect();
        let mut seen_final = false;
        let mut batch_index = 0i64;
        let results = BatchExecutor::execute(
            &mut queue, &mut seen_final, &mut batch_index, true, true, false, 200, &txn, &site, &coordinator, None,
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 450);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn batch_index_increments_once_per_execute_call() {
        let site = FakeSite;
        let coordinator = FakeCoordinator;
        let txn = TxnHandle::new(1, 1, UniqueId(1));
        let mut queue = vec![QueuedStatement::new(descriptor(), vec![SqlValue::BigInt(1)], None)];
        let mut seen_final = false;
        let mut batch_index = -1i64;
        BatchExecutor::execute(
            &mut queue, &mut seen_final, &mut batch_index, false, true, false, 200, &txn, &site, &coordinator, None,
        )
        .await
        .unwrap();
        assert_eq!(batch_index, 0);
    }
}
