//! Closed error taxonomy for a stored procedure invocation (spec §7) and the
//! client-visible response envelope it is classified into (spec §4.9).

use thiserror::Error;

/// Every error a queueing call, the batch executor, or the invocation
/// driver can produce. This set is closed by design: the error classifier
/// (spec §4.9) is exhaustive over it, so adding a variant means deciding
/// its client-visible status at the same time.
#[derive(Debug, Error)]
pub enum ProcedureError {
    #[error("statement descriptor is null")]
    NullStatement,

    #[error("EXPECTS {expected} PARAMS, BUT RECEIVED {received}")]
    ArityMismatch { expected: usize, received: usize },

    #[error("type error at parameter {index}: {reason}")]
    TypeError { index: usize, reason: String },

    #[error("unknown type for null at parameter {index}")]
    UnknownTypeForNull { index: usize },

    #[error("planner error: {message}")]
    PlannerError { message: String },

    #[error("attempted to queue a write statement from a read-only procedure")]
    DmlFromReadOnly,

    #[error("ad-hoc SQL extracted constant parameters but the caller also supplied arguments")]
    ExtractedParamsConflict,

    #[error("execute() called again after a final batch was already dispatched")]
    DoubleFinalBatch,

    #[error("result row count for statement {index} violated its expectation")]
    ExpectationMismatch { index: usize },

    #[error("invocation return value invalid: {reason}")]
    InvocationReturnError { reason: String },

    #[error("invocation return type invalid: {reason}")]
    ReturnTypeError { reason: String },

    #[error("USER ABORT: {message}")]
    UserAbort { message: String },

    #[error("CONSTRAINT VIOLATION: {message}")]
    ConstraintViolation { message: String },

    #[error("SQL ERROR: {message}")]
    SqlError { message: String },

    #[error("Transaction Interrupted")]
    Interrupt,

    #[error("HSQL-BACKEND ERROR: {message}")]
    ExpectedProcedureError { message: String, inner: String },

    #[error("TRANSACTION RESTART")]
    TransactionRestart,

    #[error("UNEXPECTED FAILURE: {message}")]
    UnexpectedFailure { message: String },

    /// Bypasses response construction entirely: the caller must crash the
    /// site rather than build a `ClientResponse` (spec §7, "Propagation
    /// policy").
    #[error("fatal to server: {message}")]
    FatalToServer { message: String },
}

impl ProcedureError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedFailure {
            message: message.into(),
        }
    }
}

/// Errors from the external collaborators the runner dispatches to (the
/// site execution engine, the fragment coordinator, the ad-hoc planner,
/// and the plan fragment repository). These are not part of the closed
/// per-call taxonomy above; the invocation driver maps them into it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("sql error: {0}")]
    Sql(String),

    #[error("execution interrupted")]
    Interrupted,

    #[error("transaction must restart: {0}")]
    Restart(String),

    #[error("fatal engine error: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

impl From<EngineError> for ProcedureError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ConstraintViolation(message) => ProcedureError::ConstraintViolation { message },
            EngineError::Sql(message) => ProcedureError::SqlError { message },
            EngineError::Interrupted => ProcedureError::Interrupt,
            EngineError::Restart(_) => ProcedureError::TransactionRestart,
            EngineError::Fatal(message) => ProcedureError::FatalToServer { message },
            EngineError::Other(message) => ProcedureError::UnexpectedFailure { message },
        }
    }
}

/// Configuration or setup failures that are not part of the per-call error
/// taxonomy (e.g. a malformed `RunnerConfig`).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid runner configuration: {0}")]
    InvalidConfig(String),
}

/// Closed set of client-visible status codes (spec §4.9 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Success,
    UserAbort,
    GracefulFailure,
    TxnRestart,
    UnexpectedFailure,
}

/// A single synthesized stack frame, filtered to the frames that matter for
/// a client-visible error (spec §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub declaring_symbol: String,
    pub description: String,
}

/// The envelope returned from exactly one call per invocation, unless the
/// site crashes (spec §3 "Result envelope").
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    pub status: ClientStatus,
    pub app_status_code: i8,
    pub app_status_string: String,
    pub results: Vec<crate::statement::ResultTable>,
    pub message: String,
    pub hash: Option<u32>,
    /// Set only for a replicated (replay-of-primary) invocation: a CRC32C
    /// over `results`, substituted for the tables themselves so a replica
    /// can report "I computed the same thing" without re-shipping the rows
    /// (spec §4.2 "Publication"). `results` is emptied whenever this is set.
    pub results_hash: Option<u32>,
}

impl ClientResponse {
    pub fn success(results: Vec<crate::statement::ResultTable>) -> Self {
        Self {
            status: ClientStatus::Success,
            app_status_code: 0,
            app_status_string: String::new(),
            results,
            message: String::new(),
            hash: None,
            results_hash: None,
        }
    }

    /// Replace `results` with their hash, for the replicated-invocation
    /// comparison path (spec §4.2 "Publication").
    pub fn into_hashed_results(mut self) -> Self {
        self.results_hash = Some(crate::statement::hash_result_tables(&self.results));
        self.results.clear();
        self
    }
}

/// Maps an exceptional outcome to its client-visible status and message
/// prefix (spec §4.9 table), plus frames filtered to those that originated
/// inside the procedure.
pub fn classify(
    err: &ProcedureError,
    procedure_name: &str,
    raw_frames: &[StackFrame],
) -> (ClientStatus, String, Vec<StackFrame>) {
    match err {
        ProcedureError::UserAbort { message } => (
            ClientStatus::UserAbort,
            format!("USER ABORT: {message}"),
            filter_frames(procedure_name, raw_frames),
        ),
        ProcedureError::ConstraintViolation { message } => (
            ClientStatus::GracefulFailure,
            format!("CONSTRAINT VIOLATION: {message}"),
            filter_frames(procedure_name, raw_frames),
        ),
        ProcedureError::SqlError { message } => (
            ClientStatus::GracefulFailure,
            format!("SQL ERROR: {message}"),
            filter_frames(procedure_name, raw_frames),
        ),
        ProcedureError::Interrupt => (
            ClientStatus::GracefulFailure,
            "Transaction Interrupted".to_string(),
            filter_frames(procedure_name, raw_frames),
        ),
        ProcedureError::ExpectedProcedureError { message, inner: _ } => (
            ClientStatus::GracefulFailure,
            format!("HSQL-BACKEND ERROR: {message}"),
            filter_frames(procedure_name, raw_frames),
        ),
        ProcedureError::TransactionRestart => (
            ClientStatus::TxnRestart,
            "TRANSACTION RESTART".to_string(),
            raw_frames.to_vec(),
        ),
        ProcedureError::FatalToServer { message } => (
            // Never actually surfaced: callers must crash before building a response.
            ClientStatus::UnexpectedFailure,
            format!("UNEXPECTED FAILURE: {message}"),
            raw_frames.to_vec(),
        ),
        other => (
            ClientStatus::UnexpectedFailure,
            format!("UNEXPECTED FAILURE: {other}"),
            raw_frames.to_vec(),
        ),
    }
}

/// Frames whose declaring symbol is the procedure itself or one of its
/// inner classes (`ProcedureName$Inner`), per spec §4.9.
fn filter_frames(procedure_name: &str, frames: &[StackFrame]) -> Vec<StackFrame> {
    let inner_prefix = format!("{procedure_name}$");
    frames
        .iter()
        .filter(|f| f.declaring_symbol == procedure_name || f.declaring_symbol.starts_with(&inner_prefix))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sym: &str) -> StackFrame {
        StackFrame {
            declaring_symbol: sym.to_string(),
            description: format!("{sym}.run"),
        }
    }

    #[test]
    fn classify_user_abort() {
        let err = ProcedureError::UserAbort {
            message: "insufficient funds".into(),
        };
        let (status, message, _) = classify(&err, "Withdraw", &[]);
        assert_eq!(status, ClientStatus::UserAbort);
        assert!(message.starts_with("USER ABORT"));
    }

    #[test]
    fn classify_expected_procedure_error_unwraps_one_layer() {
        let err = ProcedureError::ExpectedProcedureError {
            message: "duplicate key".into(),
            inner: "org.hsqldb.HsqlException".into(),
        };
        let (status, message, _) = classify(&err, "Insert", &[]);
        assert_eq!(status, ClientStatus::GracefulFailure);
        assert!(message.contains("HSQL-BACKEND ERROR"));
    }

    #[test]
    fn classify_everything_else_is_unexpected() {
        let err = ProcedureError::NullStatement;
        let (status, message, _) = classify(&err, "Insert", &[]);
        assert_eq!(status, ClientStatus::UnexpectedFailure);
        assert!(message.contains("UNEXPECTED FAILURE"));
    }

    #[test]
    fn filter_frames_keeps_only_procedure_and_inner_classes() {
        let frames = vec![frame("Withdraw"), frame("Withdraw$Helper"), frame("java.lang.Thread")];
        let err = ProcedureError::UserAbort {
            message: "x".into(),
        };
        let (_, _, filtered) = classify(&err, "Withdraw", &frames);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|f| f.declaring_symbol != "java.lang.Thread"));
    }

    #[test]
    fn transaction_restart_keeps_full_stack() {
        let frames = vec![frame("Withdraw"), frame("java.lang.Thread")];
        let err = ProcedureError::TransactionRestart;
        let (status, _, filtered) = classify(&err, "Withdraw", &frames);
        assert_eq!(status, ClientStatus::TxnRestart);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn engine_error_converts_to_taxonomy() {
        let e: ProcedureError = EngineError::ConstraintViolation("dup".into()).into();
        assert!(matches!(e, ProcedureError::ConstraintViolation { .. }));
        let e: ProcedureError = EngineError::Restart("retry".into()).into();
        assert!(matches!(e, ProcedureError::TransactionRestart));
    }
}
