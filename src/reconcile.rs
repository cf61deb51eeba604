// src/reconcile.rs

use crate::error::StoreError;
use crate::heuristics::ExtractedFields;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;

/// A persisted receipt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub id: i64,
    pub purchased_at: String,
    pub merchant_name: String,
    pub total_amount: String,
    /// Where the source document lives; replaced on every re-extraction.
    pub file_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Receipt {
    pub fn natural_key(&self) -> NaturalKey<'_> {
        NaturalKey {
            purchased_at: &self.purchased_at,
            merchant_name: &self.merchant_name,
            total_amount: &self.total_amount,
        }
    }
}

/// Fields for a receipt that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewReceipt {
    pub purchased_at: String,
    pub merchant_name: String,
    pub total_amount: String,
    pub file_path: String,
}

/// The (date, merchant, amount) triple that identifies one purchase.
///
/// Compared as exact strings: `"12.5"` and `"12.50"` are different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalKey<'a> {
    pub purchased_at: &'a str,
    pub merchant_name: &'a str,
    pub total_amount: &'a str,
}

impl<'a> From<&'a ExtractedFields> for NaturalKey<'a> {
    fn from(fields: &'a ExtractedFields) -> Self {
        NaturalKey {
            purchased_at: &fields.purchased_at,
            merchant_name: &fields.merchant_name,
            total_amount: &fields.total_amount,
        }
    }
}

/// Storage the reconciler writes through. Implementations assign ids and
/// timestamps; `created_at` is set once, `updated_at` on every write.
pub trait RecordStore {
    /// At most one receipt carries a given key.
    fn find_by_natural_key(&self, key: NaturalKey<'_>) -> Result<Option<Receipt>, StoreError>;

    fn insert_receipt(&self, receipt: &NewReceipt) -> Result<Receipt, StoreError>;

    fn update_file_path(&self, id: i64, file_path: &str) -> Result<Receipt, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reconciled {
    pub receipt: Receipt,
    pub outcome: ReconcileOutcome,
}

/// Update the receipt matching `fields` to point at `file_path`, or insert a
/// new one. Performs exactly one write against `store`; store errors are
/// returned unchanged.
///
/// The lookup and the write are separate store calls. Two concurrent calls
/// for the same key can both miss the lookup; the store's unique constraint
/// then rejects the second insert with [`StoreError::ConstraintViolation`].
pub fn reconcile<S: RecordStore + ?Sized>(
    fields: &ExtractedFields,
    file_path: &str,
    store: &S,
) -> Result<Reconciled, StoreError> {
    let key = NaturalKey::from(fields);

    match store.find_by_natural_key(key)? {
        Some(existing) => {
            let receipt = store.update_file_path(existing.id, file_path)?;
            info!(
                id = receipt.id,
                merchant = %receipt.merchant_name,
                file_path = %receipt.file_path,
                "Existing receipt matched, file path updated"
            );
            Ok(Reconciled {
                receipt,
                outcome: ReconcileOutcome::Updated,
            })
        }
        None => {
            let receipt = store.insert_receipt(&NewReceipt {
                purchased_at: fields.purchased_at.clone(),
                merchant_name: fields.merchant_name.clone(),
                total_amount: fields.total_amount.clone(),
                file_path: file_path.to_string(),
            })?;
            info!(
                id = receipt.id,
                merchant = %receipt.merchant_name,
                total = %receipt.total_amount,
                purchased_at = %receipt.purchased_at,
                "New receipt stored"
            );
            Ok(Reconciled {
                receipt,
                outcome: ReconcileOutcome::Inserted,
            })
        }
    }
}
