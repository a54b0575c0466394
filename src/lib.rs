//! Per-site stored procedure execution engine.
//!
//! Drives one invocation at a time through parameter coercion, statement
//! queueing, batched dispatch to either a single-partition fast path or a
//! multi-partition slow path coordinated through a distributed
//! dependency-collection protocol, determinism hashing over the write
//! statements it queued, and a closed error taxonomy mapped to a small set
//! of client-visible outcomes.
//!
//! Modules are ordered leaves-first: [`statement`] and [`params`] have no
//! dependencies within this crate; [`invocation`] sits at the top,
//! orchestrating everything below it.

pub mod batch;
pub mod config;
pub mod determinism;
pub mod error;
pub mod fast_path;
pub mod invocation;
pub mod params;
pub mod partition;
pub mod ports;
pub mod queued_statement;
pub mod slow_path;
pub mod statement;
pub mod stats;
pub mod types;

pub use config::RunnerConfig;
pub use error::{ClientResponse, ClientStatus, ProcedureError, RunnerError};
pub use invocation::{ProcedureContext, ProcedureEntryPoint, ProcedureImpl, ProcedureLanguage, ProcedureMetadata, ProcedureRunner, RunnerPorts};
pub use params::{CallerArg, SqlType, SqlValue};
pub use statement::{Expectation, ResultTable, StatementDescriptor};
pub use types::{Fragment, FragmentId, PartitionId, PlanHash, TxnHandle, UniqueId};
