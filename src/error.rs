// src/error.rs

use rusqlite::ErrorCode;
use thiserror::Error;

/// Failures raised by a [`crate::reconcile::RecordStore`].
///
/// Reconciliation never retries or masks these; they reach the caller as-is.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (cannot open, busy, locked, I/O).
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// The write was rejected by a store-level constraint.
    #[error("record store constraint violation: {0}")]
    ConstraintViolation(String),

    /// An update targeted a row that does not exist.
    #[error("receipt {0} does not exist")]
    NotFound(i64),

    #[error("record store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Transient failures are worth retrying from the outside; nothing in this
    /// crate retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull,
            ) => StoreError::Unavailable(err.to_string()),
            Some(ErrorCode::ConstraintViolation) => StoreError::ConstraintViolation(err.to_string()),
            _ => StoreError::Other(err.to_string()),
        }
    }
}

/// Errors from the intake pipeline (upload → validate → process).
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("receipt file {0} not found")]
    FileNotFound(i64),

    #[error("receipt {0} not found")]
    ReceiptNotFound(i64),

    #[error("only PDF files are allowed: {0}")]
    NotPdfName(String),

    #[error("receipt file {0} is not valid, run validate first")]
    NotValidated(i64),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("configuration error: {0}")]
    Config(String),
}
