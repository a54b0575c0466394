//! Slow Path: multi-partition dispatch via the distributed fragment
//! coordinator's dependency-collection protocol (spec §4.6, §4.1 module
//! list item 7).

use tracing::debug;

use crate::error::ProcedureError;
use crate::ports::{FragmentCoordinator, ParamPayload};
use crate::queued_statement::QueuedStatement;
use crate::statement::ResultTable;
use crate::types::{DependencyId, PlanHash, TxnHandle};

/// One entry in the message sent to every partition (spec §4.6
/// "Distributed message").
#[derive(Debug, Clone)]
pub struct DistributedFragmentEntry {
    pub plan_hash: PlanHash,
    pub plan_bytes: Option<bytes::Bytes>,
    pub output_dependency: DependencyId,
    pub is_replicated_read: bool,
    pub params: ParamPayload,
}

#[derive(Debug, Clone, Default)]
pub struct DistributedFragmentMessage {
    pub entries: Vec<DistributedFragmentEntry>,
}

/// One entry in the message executed only on the local site, feeding the
/// aggregator from a collector's intermediate output (spec §4.6 "Local
/// message").
#[derive(Debug, Clone)]
pub struct LocalFragmentEntry {
    pub plan_hash: PlanHash,
    pub plan_bytes: Option<bytes::Bytes>,
    pub output_dependency: DependencyId,
    pub input_dependency: DependencyId,
    pub params: ParamPayload,
}

#[derive(Debug, Clone, Default)]
pub struct LocalFragmentMessage {
    pub entries: Vec<LocalFragmentEntry>,
}

pub struct SlowPathExecutor;

impl SlowPathExecutor {
    /// Drive one sub-batch through the distributed dependency-collection
    /// protocol, returning one result table per statement in queueing
    /// order.
    pub async fn execute(
        sub_batch: &mut [QueuedStatement],
        txn: &TxnHandle,
        coordinator: &dyn FragmentCoordinator,
        is_final_sub_batch: bool,
    ) -> Result<Vec<ResultTable>, ProcedureError> {
        let mut deps_to_resume = Vec::with_capacity(sub_batch.len());
        let mut distributed = DistributedFragmentMessage::default();
        let mut local = LocalFragmentMessage::default();
        let mut local_frags_all_non_transactional = true;
        let mut any_local = false;

        for stmt in sub_batch.iter_mut() {
            let d_i = txn.allocate_dependency_id(false);
            deps_to_resume.push(d_i);

            let params = ParamPayload::Serialized(stmt.serialized_params().clone());

            match stmt.descriptor.collector {
                None => {
                    distributed.entries.push(DistributedFragmentEntry {
                        plan_hash: stmt.descriptor.aggregator.plan_hash,
                        plan_bytes: stmt.descriptor.aggregator_plan_bytes.clone(),
                        output_dependency: d_i,
                        is_replicated_read: true,
                        params,
                    });
                }
                Some(collector) => {
                    let o_i = txn.allocate_dependency_id(true);
                    distributed.entries.push(DistributedFragmentEntry {
                        plan_hash: collector.plan_hash,
                        plan_bytes: stmt.descriptor.collector_plan_bytes.clone(),
                        output_dependency: o_i,
                        is_replicated_read: false,
                        params: params.clone(),
                    });
                    local.entries.push(LocalFragmentEntry {
                        plan_hash: stmt.descriptor.aggregator.plan_hash,
                        plan_bytes: stmt.descriptor.aggregator_plan_bytes.clone(),
                        output_dependency: d_i,
                        input_dependency: o_i,
                        params,
                    });
                    any_local = true;
                    if stmt.descriptor.aggregator.is_transactional {
                        local_frags_all_non_transactional = false;
                    }
                }
            }
        }

        debug!(
            count = deps_to_resume.len(),
            has_local = any_local,
            "slow path dispatching dependency-collection batch"
        );

        coordinator.register_dependencies(txn.effective_txn_id(), &deps_to_resume);
        coordinator.install_local_work(
            txn.effective_txn_id(),
            local,
            any_local && local_frags_all_non_transactional && is_final_sub_batch,
        );
        coordinator.install_distributed_work(txn.effective_txn_id(), distributed);

        let collected = coordinator
            .recursable_run(txn.effective_txn_id())
            .await
            .map_err(ProcedureError::from)?;

        deps_to_resume
            .into_iter()
            .enumerate()
            .map(|(index, dep)| {
                collected.get(&dep).cloned().ok_or_else(|| {
                    ProcedureError::unexpected(format!("dependency {dep:?} for statement {index} was not collected"))
                })
            })
            .collect()
    }
}
