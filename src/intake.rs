// src/intake.rs

use crate::error::{IntakeError, StoreError};
use crate::heuristics::{self, ExtractedFields};
use crate::ocr::TextRecognizer;
use crate::receipt_db::{ReceiptFileRecord, ReceiptStore};
use crate::reconcile::{self, Receipt, ReconcileOutcome};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Outcome of a validation run, as persisted on the file row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub file_id: i64,
    pub is_valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Processed {
    pub file_id: i64,
    pub fields: ExtractedFields,
    pub outcome: ReconcileOutcome,
    pub receipt: Receipt,
}

/// Copy `source` into `upload_dir` and register it, unvalidated.
pub fn upload(
    store: &ReceiptStore,
    upload_dir: &Path,
    source: &Path,
) -> Result<ReceiptFileRecord, IntakeError> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !file_name.ends_with(".pdf") {
        return Err(IntakeError::NotPdfName(file_name));
    }
    let bytes = fs::read(source)?;
    upload_bytes(store, upload_dir, &file_name, &bytes)
}

/// Store already-received bytes under `upload_dir/file_name` and register them.
pub fn upload_bytes(
    store: &ReceiptStore,
    upload_dir: &Path,
    file_name: &str,
    bytes: &[u8],
) -> Result<ReceiptFileRecord, IntakeError> {
    if !file_name.ends_with(".pdf") {
        return Err(IntakeError::NotPdfName(file_name.to_string()));
    }
    // Keep only the final component so a name cannot escape the upload dir.
    let Some(safe_name) = Path::new(file_name).file_name() else {
        return Err(IntakeError::NotPdfName(file_name.to_string()));
    };

    fs::create_dir_all(upload_dir)?;
    let dest = upload_dir.join(safe_name);
    fs::write(&dest, bytes)?;

    let sha256 = ReceiptStore::hash_bytes(bytes);
    if let Some(earlier) = store.find_file_by_sha256(&sha256)? {
        warn!(
            earlier_id = earlier.id,
            earlier_name = %earlier.file_name,
            "Upload repeats an earlier file"
        );
    }
    let record = store.insert_file(file_name, &dest.to_string_lossy(), &sha256)?;
    info!(file_id = record.id, path = %record.file_path, bytes = bytes.len(), "Upload registered");
    Ok(record)
}

/// Check that the registered file exists and starts with the PDF signature.
/// The verdict is written back to the file row.
pub fn validate(store: &ReceiptStore, file_id: i64) -> Result<Validation, IntakeError> {
    let file = store
        .get_file(file_id)?
        .ok_or(IntakeError::FileNotFound(file_id))?;

    let path = Path::new(&file.file_path);
    let reason = if !path.exists() {
        Some("File not found on disk".to_string())
    } else {
        match read_header(path) {
            Ok(header) if header == PDF_MAGIC => None,
            Ok(_) => Some("File is not a valid PDF".to_string()),
            Err(e) => Some(e.to_string()),
        }
    };

    let is_valid = reason.is_none();
    store.set_file_validity(file_id, is_valid, reason.as_deref())?;
    if let Some(r) = &reason {
        warn!(file_id, reason = %r, "Validation failed");
    }
    Ok(Validation {
        file_id,
        is_valid,
        reason,
    })
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(PDF_MAGIC.len());
    File::open(path)?
        .take(PDF_MAGIC.len() as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Recognize, extract and reconcile one validated file.
///
/// The reconcile write and the processed flag commit together.
pub fn process(
    store: &ReceiptStore,
    recognizer: &dyn TextRecognizer,
    file_id: i64,
) -> Result<Processed, IntakeError> {
    let file = store
        .get_file(file_id)?
        .ok_or(IntakeError::FileNotFound(file_id))?;
    if !file.is_valid {
        return Err(IntakeError::NotValidated(file_id));
    }

    let span = tracing::info_span!("process", file_id, file_name = %file.file_name);
    let _guard = span.enter();

    let text = recognizer.recognize_text(Path::new(&file.file_path))?;
    debug!(text = %text, "Recognized text");

    let fields = heuristics::extract_fields(&text);
    let (filled, total) = fields.coverage();
    info!(
        filled,
        total,
        merchant = %fields.merchant_name,
        total_amount = %fields.total_amount,
        purchased_at = %fields.purchased_at,
        "Extraction result"
    );

    let tx = store.begin_immediate()?;
    let reconciled = reconcile::reconcile(&fields, &file.file_path, store)?;
    store.mark_file_processed(file_id)?;
    tx.commit().map_err(StoreError::from)?;

    Ok(Processed {
        file_id,
        fields,
        outcome: reconciled.outcome,
        receipt: reconciled.receipt,
    })
}

pub fn list_receipts(store: &ReceiptStore) -> Result<Vec<Receipt>, IntakeError> {
    Ok(store.list_receipts()?)
}

pub fn get_receipt(store: &ReceiptStore, id: i64) -> Result<Receipt, IntakeError> {
    store
        .get_receipt(id)?
        .ok_or(IntakeError::ReceiptNotFound(id))
}
