//! Shared in-memory fakes for the external-collaborator ports, exercised
//! by the scenario tests the way the corpus fakes
//! `MessagingProvider::new_in_memory()` for `MessageClient` tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use sproc_runner::error::{ClientResponse, ProcedureError};
use sproc_runner::params::SqlValue;
use sproc_runner::ports::{AdHocPlanner, FragmentCoordinator, ParamPayload, PlannedStatementBatch, SiteExecutionContext};
use sproc_runner::slow_path::{DistributedFragmentMessage, LocalFragmentMessage};
use sproc_runner::{FragmentId, ResultTable};

pub struct FakeSite;

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
    ) -> Result<Vec<ResultTable>, sproc_runner::error::EngineError> {
        Ok(fragments
            .iter()
            .map(|_| ResultTable::new(vec![vec![SqlValue::BigInt(1)]]))
            .collect())
    }

    async fn load_table(
        &self,
        _cluster: &str,
        _database: &str,
        _table: &str,
        _data: Bytes,
        _return_unique_violations: bool,
        _should_dr_stream: bool,
    ) -> Result<Option<Bytes>, sproc_runner::error::EngineError> {
        Ok(None)
    }
}

/// Drives `recursable_run` by synthesizing one single-row result table per
/// registered dependency id, mirroring what an external mailbox would
/// eventually deliver.
#[derive(Default)]
pub struct FakeCoordinator {
    registered: Mutex<Vec<sproc_runner::types::DependencyId>>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FragmentCoordinator for FakeCoordinator {
    fn register_dependencies(&self, _txn_id: i64, deps: &[sproc_runner::types::DependencyId]) {
        *self.registered.lock().unwrap() = deps.to_vec();
    }

    fn install_local_work(&self, _txn_id: i64, _message: LocalFragmentMessage, _non_transactional: bool) {}

    fn install_distributed_work(&self, _txn_id: i64, _message: DistributedFragmentMessage) {}

    async fn recursable_run(
        &self,
        _txn_id: i64,
    ) -> Result<HashMap<sproc_runner::types::DependencyId, ResultTable>, sproc_runner::error::EngineError> {
        let deps = self.registered.lock().unwrap().clone();
        Ok(deps
            .into_iter()
            .map(|d| (d, ResultTable::new(vec![vec![SqlValue::BigInt(1)]])))
            .collect())
    }
}

pub struct UnreachablePlanner;

#[async_trait]
impl AdHocPlanner for UnreachablePlanner {
    async fn plan(&self, _sql: &str, _is_read_only_procedure: bool) -> Result<PlannedStatementBatch, ProcedureError> {
        unreachable!("ad-hoc planning is not exercised by these scenarios")
    }
}

pub fn assert_graceful_failure_contains(response: &ClientResponse, needle: &str) {
    assert_eq!(response.status, sproc_runner::ClientStatus::GracefulFailure);
    assert!(response.message.contains(needle), "message was: {}", response.message);
}
