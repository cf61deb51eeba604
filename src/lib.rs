pub mod config;
pub mod error;
pub mod heuristics;
pub mod intake;
pub mod ocr;
pub mod receipt_db;
pub mod reconcile;

pub use error::{IntakeError, StoreError};
pub use heuristics::{AMOUNT_NOT_FOUND, DATE_UNKNOWN, ExtractedFields, extract_fields};
pub use reconcile::{Receipt, RecordStore, ReconcileOutcome, reconcile};
