//! Ports to the external collaborators named in spec §1 "Out of scope":
//! the site execution context, the distributed fragment coordinator, the
//! ad-hoc SQL planner, and the process-wide plan fragment repository.
//! These are genuine boundaries to another subsystem, so they are
//! `async_trait` objects behind `Arc<dyn Trait + Send + Sync>` rather than
//! an enum — the runner has no closed set of implementations to dispatch
//! over, unlike its internal fast/slow path choice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{EngineError, ProcedureError};
use crate::params::{CallerArg, SqlType, SqlValue};
use crate::slow_path::{DistributedFragmentMessage, LocalFragmentMessage};
use crate::statement::ResultTable;
use crate::types::{DependencyId, FragmentId, PlanHash};

/// Parameters for one fragment call: the memoized serialized buffer for a
/// write, or the raw coerced values for a read (spec §4.5).
#[derive(Debug, Clone)]
pub enum ParamPayload {
    Serialized(Bytes),
    Raw(Vec<SqlValue>),
}

/// The engine's local execution boundary: fast-path single-partition
/// dispatch (spec §4.5).
#[async_trait]
pub trait SiteExecutionContext: Send + Sync {
    async fn execute_plan_fragments(
        &self,
        txn_id: i64,
        sp_handle: i64,
        unique_id: i64,
        read_only: bool,
        fragments: &[FragmentId],
        params: &[ParamPayload],
    ) -> Result<Vec<ResultTable>, EngineError>;

    /// Load a table generated outside normal SQL execution (spec §6
    /// `loadTable`). Returns an optional buffer describing rows that
    /// violated a unique constraint, when `return_unique_violations` was
    /// requested.
    async fn load_table(
        &self,
        cluster: &str,
        database: &str,
        table: &str,
        data: Bytes,
        return_unique_violations: bool,
        should_dr_stream: bool,
    ) -> Result<Option<Bytes>, EngineError>;
}

/// The distributed fragment coordinator: registers expected dependency
/// ids, installs local/distributed work, and drives the
/// dependency-collection suspension point (spec §4.6).
#[async_trait]
pub trait FragmentCoordinator: Send + Sync {
    fn register_dependencies(&self, txn_id: i64, deps: &[DependencyId]);

    fn install_local_work(&self, txn_id: i64, message: LocalFragmentMessage, non_transactional: bool);

    fn install_distributed_work(&self, txn_id: i64, message: DistributedFragmentMessage);

    /// Suspends until every dependency id registered for `txn_id` has been
    /// collected, returning exactly one result table per id.
    async fn recursable_run(&self, txn_id: i64) -> Result<HashMap<DependencyId, ResultTable>, EngineError>;
}

/// The result of ad-hoc planning a piece of caller-supplied SQL text (spec
/// §4.3 "Queue ad-hoc SQL + args").
#[derive(Debug, Clone)]
pub struct PlannedStatementBatch {
    pub sql_text: Arc<str>,
    pub aggregator_plan_hash: PlanHash,
    pub aggregator_plan_bytes: Option<Bytes>,
    pub collector_plan_hash: Option<PlanHash>,
    pub collector_plan_bytes: Option<Bytes>,
    pub param_types: Vec<SqlType>,
    pub read_only: bool,
    /// Constants the planner pulled out of the SQL text itself. When
    /// nonempty, the caller must supply zero arguments of its own (spec
    /// §4.3 `ExtractedParamsConflict`).
    pub extracted_params: Vec<CallerArg>,
}

/// Ad-hoc SQL planning, delegated entirely outside the runner (spec §1).
#[async_trait]
pub trait AdHocPlanner: Send + Sync {
    async fn plan(&self, sql: &str, is_read_only_procedure: bool) -> Result<PlannedStatementBatch, ProcedureError>;
}

/// Process-wide, ref-counted cache from plan hash to the fragment id the
/// engine assigned it (spec §5 "Shared resources", §9 "Global mutable
/// stats / plan repositories"). The runner's sole entry point is
/// `load_or_add_ref`; every load increments a refcount, paired with a
/// `release` when the owning statement is dropped.
pub trait PlanFragmentRepository: Send + Sync {
    fn load_or_add_ref(&self, plan_hash: PlanHash, plan_bytes: Option<&[u8]>) -> Result<FragmentId, ProcedureError>;

    fn release(&self, plan_hash: PlanHash);
}

struct RepositoryEntry {
    fragment_id: FragmentId,
    refcount: AtomicI64,
}

/// A concurrent, ref-counted implementation backed by `DashMap`, suitable
/// as the process-wide singleton shared across every runner instance on a
/// site (spec §9 "single owned service handle with interior
/// synchronization").
#[derive(Default)]
pub struct DefaultPlanFragmentRepository {
    entries: DashMap<PlanHash, RepositoryEntry>,
    next_custom_id: AtomicI64,
}

impl DefaultPlanFragmentRepository {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_custom_id: AtomicI64::new(1),
        }
    }
}

impl PlanFragmentRepository for DefaultPlanFragmentRepository {
    fn load_or_add_ref(&self, plan_hash: PlanHash, plan_bytes: Option<&[u8]>) -> Result<FragmentId, ProcedureError> {
        if let Some(entry) = self.entries.get(&plan_hash) {
            entry.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(entry.fragment_id);
        }

        // Custom (ad-hoc, non-cataloged) fragments carry their own plan
        // bytes and are assigned a fresh synthetic id (spec §4.6 "Custom
        // fragments").
        let _ = plan_bytes;
        let id = FragmentId(self.next_custom_id.fetch_add(1, Ordering::SeqCst) as u64);
        self.entries.insert(
            plan_hash,
            RepositoryEntry {
                fragment_id: id,
                refcount: AtomicI64::new(1),
            },
        );
        Ok(id)
    }

    fn release(&self, plan_hash: PlanHash) {
        let mut drop_entry = false;
        if let Some(entry) = self.entries.get(&plan_hash) {
            if entry.refcount.fetch_sub(1, Ordering::SeqCst) <= 1 {
                drop_entry = true;
            }
        }
        if drop_entry {
            self.entries.remove(&plan_hash);
        }
    }
}
