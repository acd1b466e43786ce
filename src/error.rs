//! Crate-wide error type.
//!
//! Mirrors the error kinds from the system's error-handling design: each
//! variant names its recovery story in the doc comment rather than in
//! the code that raises it.

use thiserror::Error;

use crate::common::PageId;

/// Single tagged error type returned from every fallible engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Raised by the (external) SQL parser collaborator; reported to the client as-is.
    #[error("parse error: {0}")]
    Parse(String),

    /// Unknown table, column or index name.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Constraint violation or type mismatch; the statement aborts but the
    /// transaction may continue.
    #[error("execution error: {0}")]
    Execution(String),

    /// Deadlock victim or lock-wait timeout; the transaction is aborted,
    /// the client may retry.
    #[error("transaction aborted: {0}")]
    ConcurrencyAbort(String),

    /// Disk read/write failure. The connection is dropped; recovery runs
    /// on the next restart.
    #[error("io error: {0}")]
    Io(String),

    /// Bad magic, bad checksum or bad node size. The page is marked
    /// unusable and the error is logged; the engine never guesses data.
    #[error("corruption at page {page}: {reason}")]
    Corruption { page: PageId, reason: String },

    /// Role/authentication check failed; reported pre-execution.
    #[error("access denied: {0}")]
    AuthDenied(String),

    /// No free frames or no free pages; retryable.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl EngineError {
    pub fn corruption(page: PageId, reason: impl Into<String>) -> Self {
        EngineError::Corruption {
            page,
            reason: reason.into(),
        }
    }

    /// Whether the commanding transaction must abort as a consequence of
    /// this error (§7: a txn-level error always runs the abort path
    /// before the response is flushed).
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            EngineError::Execution(_) | EngineError::ConcurrencyAbort(_) | EngineError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
