//! Invocation Driver: the per-call state machine — reset, coerce, dispatch
//! to user code, classify failures, assemble the response, tear down
//! (spec §4.7, §4.1 module list item 8).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, instrument};

use crate::batch::{BatchExecutor, ReferenceBackend};
use crate::config::RunnerConfig;
use crate::determinism::DeterminismAccumulator;
use crate::error::{classify, ClientResponse, ClientStatus, ProcedureError, StackFrame};
use crate::params::{CallerArg, ParameterCoercer, SqlType, SqlValue};
use crate::partition::Partitioning;
use crate::ports::{AdHocPlanner, FragmentCoordinator, PlanFragmentRepository, SiteExecutionContext};
use crate::queued_statement::QueuedStatement;
use crate::statement::{Expectation, ResultTable, StatementDescriptor};
use crate::stats::RunnerStats;
use crate::types::TxnHandle;

/// Descriptive language tag carried for catalog/display purposes. Unlike
/// the source's visitor-based dispatch, this tag does not drive control
/// flow: dispatch is a match over [`ProcedureImpl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureLanguage {
    Native,
    Scripted,
}

/// A value returned by user code, before coercion into result tables
/// (spec §4.7 "Return-value coercion"). The closed set of arms here
/// already rules out `ReturnTypeError` by construction — a Rust enum
/// cannot hold "some other type" the way a reflective return value could.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureReturn {
    Null,
    Table(ResultTable),
    /// Mirrors a `VoltTable[]` return: preserved as-is, but an inner `None`
    /// surfaces as `InvocationReturnError`, matching the source's guard
    /// against a null element inside the array.
    Tables(Vec<Option<ResultTable>>),
    Scalar(i64),
}

fn coerce_return(ret: ProcedureReturn) -> Result<Vec<ResultTable>, ProcedureError> {
    match ret {
        ProcedureReturn::Null => Ok(Vec::new()),
        ProcedureReturn::Table(t) => Ok(vec![t]),
        ProcedureReturn::Tables(tables) => tables
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                t.ok_or_else(|| ProcedureError::InvocationReturnError {
                    reason: format!("null table at index {i}"),
                })
            })
            .collect(),
        ProcedureReturn::Scalar(v) => Ok(vec![ResultTable::new(vec![vec![SqlValue::BigInt(v)]])]),
    }
}

/// An exceptional outcome from user code, carrying whatever stack frames
/// the entry point chooses to attach for the classifier to filter (spec
/// §4.9). Frame capture is the entry point's own concern; the runner only
/// filters and formats what it is given.
#[derive(Debug)]
pub struct ProcedureFailure {
    pub error: ProcedureError,
    pub frames: Vec<StackFrame>,
}

impl From<ProcedureError> for ProcedureFailure {
    fn from(error: ProcedureError) -> Self {
        Self { error, frames: Vec::new() }
    }
}

/// The explicit, compile-time-registered entry point that replaces
/// reflective `run(...)` discovery (spec §9 "Reflective entry-point
/// discovery").
#[async_trait]
pub trait ProcedureEntryPoint: Send + Sync {
    async fn run(&self, ctx: &mut ProcedureContext<'_>, args: &[SqlValue]) -> Result<ProcedureReturn, ProcedureFailure>;
}

/// Tagged-variant replacement for the source's language visitor (spec §9
/// "Language dispatch via visitor"): each arm carries exactly the data its
/// invocation path needs, with no runtime polymorphism over language.
pub enum ProcedureImpl {
    Native(Arc<dyn ProcedureEntryPoint>),
    Scripted(Arc<dyn ProcedureEntryPoint>),
    /// A procedure whose entire body is one cataloged statement: the
    /// driver flushes it directly through the batch executor without
    /// invoking any user code (spec §4.7 "Single-statement procedure").
    SingleStatement(Arc<StatementDescriptor>),
}

/// Static, install-time identity of a procedure (spec §3 "Invocation
/// State": "Procedure identity").
pub struct ProcedureMetadata {
    pub name: Arc<str>,
    pub partitioning: Partitioning,
    pub read_only: bool,
    pub language: ProcedureLanguage,
    pub is_sysproc: bool,
    pub declared_param_types: Arc<[SqlType]>,
    pub imp: ProcedureImpl,
}

/// Per-call mutable state, reused across invocations on a single runner
/// instance (spec §3 "Invocation State", §5 "single-threaded").
#[derive(Default)]
struct InvocationState {
    pending_queue: Vec<QueuedStatement>,
    determinism: DeterminismAccumulator,
    batch_index: i64,
    seen_final_batch: bool,
    app_status_code: i8,
    app_status_string: String,
    rng: Option<StdRng>,
    txn: Option<TxnHandle>,
}

impl InvocationState {
    fn reset(&mut self) {
        self.pending_queue.clear();
        self.determinism.reset();
        self.batch_index = -1;
        self.seen_final_batch = false;
        self.app_status_code = 0;
        self.app_status_string.clear();
        self.rng = None;
        self.txn = None;
    }
}

/// The external collaborators a call needs, bundled to keep `invoke`'s
/// signature manageable (mirrors the corpus's convention of grouping a
/// call's dependencies into one context type rather than threading each
/// individually).
pub struct RunnerPorts<'a> {
    pub site: &'a dyn SiteExecutionContext,
    pub coordinator: &'a dyn FragmentCoordinator,
    pub planner: &'a dyn AdHocPlanner,
    pub plan_repo: &'a dyn PlanFragmentRepository,
    pub reference_backend: Option<&'a dyn ReferenceBackend>,
}

/// The callback surface exposed to user procedure code (spec §6 "To user
/// procedure code").
pub struct ProcedureContext<'a> {
    state: &'a mut InvocationState,
    config: &'a RunnerConfig,
    metadata: &'a ProcedureMetadata,
    ports: &'a RunnerPorts<'a>,
    stats: &'a RunnerStats,
}

impl<'a> ProcedureContext<'a> {
    pub fn queue_sql(&mut self, descriptor: Arc<StatementDescriptor>, args: Vec<CallerArg>) -> Result<(), ProcedureError> {
        self.queue_sql_with_expectation(descriptor, None, args)
    }

    pub fn queue_sql_with_expectation(
        &mut self,
        descriptor: Arc<StatementDescriptor>,
        expectation: Option<Expectation>,
        args: Vec<CallerArg>,
    ) -> Result<(), ProcedureError> {
        let coerced = ParameterCoercer::coerce(&descriptor.param_types, &args, None)?;
        let mut qs = QueuedStatement::new(descriptor, coerced, expectation);
        self.state.determinism.update(&mut qs, self.config.fail_closed_on_hash_io_error)?;
        self.state.pending_queue.push(qs);
        self.stats.record_statements_queued(1);
        Ok(())
    }

    pub async fn queue_sql_adhoc(&mut self, sql: &str, args: Vec<CallerArg>) -> Result<(), ProcedureError> {
        let planned = self.ports.planner.plan(sql, self.metadata.read_only).await?;

        if !planned.read_only && self.metadata.read_only {
            return Err(ProcedureError::DmlFromReadOnly);
        }
        if !planned.extracted_params.is_empty() && !args.is_empty() {
            return Err(ProcedureError::ExtractedParamsConflict);
        }
        let effective_args = if planned.extracted_params.is_empty() { args } else { planned.extracted_params.clone() };

        let aggregator_id = self
            .ports
            .plan_repo
            .load_or_add_ref(planned.aggregator_plan_hash, planned.aggregator_plan_bytes.as_deref())?;
        let aggregator = crate::types::Fragment {
            id: aggregator_id,
            plan_hash: planned.aggregator_plan_hash,
            is_transactional: !planned.read_only,
        };

        let collector = match planned.collector_plan_hash {
            Some(hash) => {
                let id = self.ports.plan_repo.load_or_add_ref(hash, planned.collector_plan_bytes.as_deref())?;
                Some(crate::types::Fragment {
                    id,
                    plan_hash: hash,
                    is_transactional: !planned.read_only,
                })
            }
            None => None,
        };

        let descriptor = Arc::new(
            StatementDescriptor::new(
                planned.sql_text.to_string(),
                aggregator,
                collector,
                planned.param_types.clone(),
                planned.read_only,
                false,
            )
            .with_custom_plan_bytes(planned.aggregator_plan_bytes.clone(), planned.collector_plan_bytes.clone()),
        );
        let coerced = ParameterCoercer::coerce(&descriptor.param_types, &effective_args, None)?;
        let mut qs = QueuedStatement::new(descriptor, coerced, None);
        self.state.determinism.update(&mut qs, self.config.fail_closed_on_hash_io_error)?;
        self.state.pending_queue.push(qs);
        self.stats.record_statements_queued(1);
        Ok(())
    }

    pub async fn execute_sql(&mut self, is_final: bool) -> Result<Vec<ResultTable>, ProcedureError> {
        let txn = self.state.txn.as_ref().expect("transaction handle installed for the call's duration");
        let result = BatchExecutor::execute(
            &mut self.state.pending_queue,
            &mut self.state.seen_final_batch,
            &mut self.state.batch_index,
            is_final,
            self.metadata.partitioning.single_partition,
            self.metadata.read_only,
            self.config.max_batch_size,
            txn,
            self.ports.site,
            self.ports.coordinator,
            self.ports.reference_backend,
        )
        .await;
        self.stats.record_batch_executed();
        result
    }

    pub async fn load_table(
        &self,
        cluster: &str,
        database: &str,
        table: &str,
        data: Bytes,
        return_unique_violations: bool,
        should_dr_stream: bool,
    ) -> Result<Option<Bytes>, ProcedureError> {
        self.ports
            .site
            .load_table(cluster, database, table, data, return_unique_violations, should_dr_stream)
            .await
            .map_err(ProcedureError::from)
    }

    pub fn set_app_status_code(&mut self, code: i8) {
        self.state.app_status_code = code;
    }

    pub fn set_app_status_string(&mut self, s: impl Into<String>) {
        self.state.app_status_string = s.into();
    }

    fn txn(&self) -> &TxnHandle {
        self.state.txn.as_ref().expect("transaction handle installed for the call's duration")
    }

    pub fn unique_id(&self) -> i64 {
        self.txn().effective_unique_id().0
    }

    pub fn transaction_time_millis(&self) -> i64 {
        self.txn().effective_unique_id().timestamp_millis()
    }

    /// Returns the same RNG instance for every call within this
    /// invocation, seeded lazily from the transaction's unique id (spec
    /// §4.7 "Cached RNG").
    pub fn seeded_rng(&mut self) -> &mut StdRng {
        let seed = self.txn().effective_unique_id().as_seed();
        self.state.rng.get_or_insert_with(|| StdRng::seed_from_u64(seed))
    }
}

/// Drives single stored-procedure invocations to completion, one at a
/// time, on whatever thread owns it (spec §5 "A runner instance is
/// single-threaded").
pub struct ProcedureRunner {
    state: InvocationState,
    config: RunnerConfig,
    pub stats: RunnerStats,
}

impl ProcedureRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            state: InvocationState::default(),
            config,
            stats: RunnerStats::new(),
        }
    }

    /// Run one invocation to completion. Returns `Ok(ClientResponse)` for
    /// every outcome except a fatal-to-server condition, which returns
    /// `Err` so the caller can crash the site deterministically instead of
    /// sending a response (spec §7 "Propagation policy").
    #[instrument(skip_all, fields(procedure = %metadata.name.as_ref(), txn_id = txn.txn_id))]
    pub async fn invoke(
        &mut self,
        metadata: &ProcedureMetadata,
        args: Vec<CallerArg>,
        txn: TxnHandle,
        sysproc_context: Option<CallerArg>,
        ports: &RunnerPorts<'_>,
    ) -> Result<ClientResponse, ProcedureError> {
        // 1. Reset.
        self.state.reset();
        self.stats.record_invocation_started();
        debug!(procedure = %metadata.name, "publishing procedure name to site");
        self.state.txn = Some(txn);

        let result = self.invoke_inner(metadata, args, sysproc_context, ports).await;

        // 7. Teardown: always, regardless of outcome.
        self.state.reset();
        debug!(procedure = %metadata.name, "unpublishing procedure name from site");

        match &result {
            Ok(_) => self.stats.record_invocation_succeeded(),
            Err(ProcedureError::FatalToServer { .. }) => {
                error!(procedure = %metadata.name, "fatal-to-server condition, crashing site");
                self.stats.record_invocation_failed();
            }
            Err(_) => self.stats.record_invocation_failed(),
        }

        result
    }

    async fn invoke_inner(
        &mut self,
        metadata: &ProcedureMetadata,
        args: Vec<CallerArg>,
        sysproc_context: Option<CallerArg>,
        ports: &RunnerPorts<'_>,
    ) -> Result<ClientResponse, ProcedureError> {
        // 2 & 3. Inject sysproc context, then coerce.
        let coerced = match ParameterCoercer::coerce(&metadata.declared_param_types, &args, sysproc_context) {
            Ok(values) => values,
            Err(e @ (ProcedureError::ArityMismatch { .. } | ProcedureError::TypeError { .. } | ProcedureError::UnknownTypeForNull { .. })) => {
                return Ok(ClientResponse {
                    status: ClientStatus::GracefulFailure,
                    app_status_code: 0,
                    app_status_string: String::new(),
                    results: Vec::new(),
                    message: e.to_string(),
                    hash: None,
                    results_hash: None,
                });
            }
            Err(e) => return Err(e),
        };

        // 4. Invoke user code.
        let invoke_result: Result<Vec<ResultTable>, ProcedureFailure> = match &metadata.imp {
            ProcedureImpl::SingleStatement(descriptor) => {
                let mut qs = QueuedStatement::new(descriptor.clone(), coerced, None);
                match self.state.determinism.update(&mut qs, self.config.fail_closed_on_hash_io_error) {
                    Ok(()) => {
                        self.state.pending_queue.push(qs);
                        self.stats.record_statements_queued(1);
                        let txn = self.state.txn.as_ref().expect("installed above").clone_handle();
                        let result = BatchExecutor::execute(
                            &mut self.state.pending_queue,
                            &mut self.state.seen_final_batch,
                            &mut self.state.batch_index,
                            true,
                            metadata.partitioning.single_partition,
                            metadata.read_only,
                            self.config.max_batch_size,
                            &txn,
                            ports.site,
                            ports.coordinator,
                            ports.reference_backend,
                        )
                        .await
                        .map_err(ProcedureFailure::from);
                        self.stats.record_batch_executed();
                        result
                    }
                    Err(e) => Err(ProcedureFailure::from(e)),
                }
            }
            ProcedureImpl::Native(entry) | ProcedureImpl::Scripted(entry) => {
                let mut ctx = ProcedureContext {
                    state: &mut self.state,
                    config: &self.config,
                    metadata,
                    ports,
                    stats: &self.stats,
                };
                match entry.run(&mut ctx, &coerced).await {
                    Ok(ret) => coerce_return(ret).map_err(ProcedureFailure::from),
                    Err(failure) => Err(failure),
                }
            }
        };

        // 5. Classify failures, 6. Assemble response.
        match invoke_result {
            Ok(results) => Ok(self.assemble_success(results)),
            Err(ProcedureFailure { error: ProcedureError::FatalToServer { message }, .. }) => {
                Err(ProcedureError::FatalToServer { message })
            }
            Err(ProcedureFailure { error, frames }) => {
                let (status, message, _filtered) = classify(&error, &metadata.name, &frames);
                Ok(ClientResponse {
                    status,
                    app_status_code: self.state.app_status_code,
                    app_status_string: std::mem::take(&mut self.state.app_status_string),
                    results: Vec::new(),
                    message,
                    hash: None,
                    results_hash: None,
                })
            }
        }
    }

    fn assemble_success(&self, results: Vec<ResultTable>) -> ClientResponse {
        let hash = self.state.determinism.finish();
        let response = ClientResponse {
            status: ClientStatus::Success,
            app_status_code: self.state.app_status_code,
            app_status_string: self.state.app_status_string.clone(),
            results,
            message: String::new(),
            hash,
            results_hash: None,
        };
        // Replicated path: this invocation replays a primary's execution,
        // so the caller only needs to confirm the results match, not see
        // them again (spec §4.2 "Publication").
        let is_replicated = self.state.txn.as_ref().map(TxnHandle::is_replay).unwrap_or(false);
        if is_replicated {
            response.into_hashed_results()
        } else {
            response
        }
    }
}

impl TxnHandle {
    /// A cheap duplicate sharing the same ids, used where the driver needs
    /// to hand a borrowed-looking handle to a sub-call while `self.state`
    /// is mutably borrowed elsewhere.
    fn clone_handle(&self) -> TxnHandle {
        match self.primary {
            Some(primary) => TxnHandle::replay_of(self.txn_id, self.sp_handle, self.unique_id, primary),
            None => TxnHandle::new(self.txn_id, self.sp_handle, self.unique_id),
        }
    }
}
