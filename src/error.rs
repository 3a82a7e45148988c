//! Structured error types for the medicine ledger.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! domain-specific [`LedgerError`].  The CLI converts these into stable
//! process exit statuses via [`ExitCode`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the medicine ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A batch with this identifier is already registered.
    #[error("duplicate batch: {0}")]
    DuplicateBatch(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// A required field was empty or malformed; raised before any mutation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A persisted chain failed the integrity walk on import.
    #[error("chain integrity: {0}")]
    ChainIntegrity(String),

    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(String),

    #[error("report: {0}")]
    Report(String),

    /// Direct database errors (auto-converted via `?` in the store module).
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    /// Catch-all for errors that do not fit a specific domain.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Process exit codes
// ---------------------------------------------------------------------------

/// Exit statuses reported by the `medledger` binary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    InvalidInput = 2,
    DuplicateBatch = 3,
    BatchNotFound = 4,
    ChainIntegrity = 5,
    StoreError = 6,
    DatabaseError = 7,
    ConfigError = 8,
    ReportError = 9,
    /// A verification completed and declared the batch not authentic.
    NotAuthentic = 10,
    InternalError = 99,
}

impl From<&LedgerError> for ExitCode {
    fn from(e: &LedgerError) -> Self {
        match e {
            LedgerError::DuplicateBatch(_) => Self::DuplicateBatch,
            LedgerError::BatchNotFound(_) => Self::BatchNotFound,
            LedgerError::InvalidInput(_) => Self::InvalidInput,
            LedgerError::ChainIntegrity(_) => Self::ChainIntegrity,
            LedgerError::Config(_) => Self::ConfigError,
            LedgerError::Store(_) => Self::StoreError,
            LedgerError::Report(_) => Self::ReportError,
            LedgerError::Database(_) => Self::DatabaseError,
            LedgerError::Other(_) => Self::InternalError,
        }
    }
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds domain-specific context to any `Result<T, E>`.
///
/// ```ignore
/// std::fs::read(path).ctx_store("read snapshot")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_store(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_report(self, msg: &str) -> Result<T>;
    fn ctx_input(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_store(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Store(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Config(format!("{msg}: {e}")))
    }
    fn ctx_report(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Report(format!("{msg}: {e}")))
    }
    fn ctx_input(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::InvalidInput(format!("{msg}: {e}")))
    }
}

/// Same as [`ResultExt`] but for `Option<T>` (converts `None` into an error).
pub trait OptionExt<T> {
    fn required_batch(self, batch_id: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required_batch(self, batch_id: &str) -> Result<T> {
        self.ok_or_else(|| LedgerError::BatchNotFound(batch_id.to_string()))
    }
}
