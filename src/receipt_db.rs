use crate::error::StoreError;
use crate::reconcile::{NaturalKey, NewReceipt, Receipt, RecordStore};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

pub struct ReceiptStore {
    conn: Connection,
}

/// An uploaded document awaiting validation / processing.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptFileRecord {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub sha256: String,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub is_processed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub files_total: usize,
    pub files_valid: usize,
    pub files_processed: usize,
    pub receipts: usize,
}

const RECEIPT_COLUMNS: &str =
    "id, purchased_at, merchant_name, total_amount, file_path, created_at, updated_at";

const FILE_COLUMNS: &str = "id, file_name, file_path, sha256, is_valid, invalid_reason, is_processed, created_at, updated_at";

impl ReceiptStore {
    /// Open (or create) the receipt database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // Uploaded documents
        conn.execute(
            "CREATE TABLE IF NOT EXISTS receipt_file (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                is_valid INTEGER NOT NULL DEFAULT 0,
                invalid_reason TEXT,
                is_processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Extracted receipts
        conn.execute(
            "CREATE TABLE IF NOT EXISTS receipt (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                purchased_at TEXT NOT NULL,
                merchant_name TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                file_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // One row per (date, merchant, amount)
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_receipt_natural_key
                ON receipt(purchased_at, merchant_name, total_amount)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_receipt_file_sha256 ON receipt_file(sha256)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// SHA-256 hex digest of an uploaded document.
    pub fn hash_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Begin an immediate (write-locking) transaction on this connection.
    ///
    /// Statements issued through `self` until commit run inside it.
    pub fn begin_immediate(&self) -> Result<Transaction<'_>, StoreError> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    // -----------------------------------------------------------------------
    // receipt_file
    // -----------------------------------------------------------------------

    pub fn insert_file(
        &self,
        file_name: &str,
        file_path: &str,
        sha256: &str,
    ) -> Result<ReceiptFileRecord, StoreError> {
        let now = OffsetDateTime::now_utc();
        self.conn.execute(
            "INSERT INTO receipt_file
                (file_name, file_path, sha256, is_valid, is_processed, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)",
            params![file_name, file_path, sha256, now],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(file_id = id, file_name = %file_name, "Receipt file stored");
        Ok(ReceiptFileRecord {
            id,
            file_name: file_name.to_string(),
            file_path: file_path.to_string(),
            sha256: sha256.to_string(),
            is_valid: false,
            invalid_reason: None,
            is_processed: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_file(&self, id: i64) -> Result<Option<ReceiptFileRecord>, StoreError> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM receipt_file WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::row_to_file)
            .optional()?)
    }

    /// Earliest registered upload with these exact bytes.
    pub fn find_file_by_sha256(&self, sha256: &str) -> Result<Option<ReceiptFileRecord>, StoreError> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM receipt_file WHERE sha256 = ?1 ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![sha256], Self::row_to_file)
            .optional()?)
    }

    /// Record a validation verdict. `reason` is cleared when `is_valid`.
    pub fn set_file_validity(
        &self,
        id: i64,
        is_valid: bool,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let reason = if is_valid { None } else { reason };
        let changed = self.conn.execute(
            "UPDATE receipt_file SET is_valid = ?1, invalid_reason = ?2, updated_at = ?3 WHERE id = ?4",
            params![is_valid, reason, OffsetDateTime::now_utc(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        info!(file_id = id, is_valid, reason = ?reason, "Receipt file validated");
        Ok(())
    }

    pub fn mark_file_processed(&self, id: i64) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE receipt_file SET is_processed = 1, updated_at = ?1 WHERE id = ?2",
            params![OffsetDateTime::now_utc(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        info!(file_id = id, "Receipt file marked as processed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // receipt
    // -----------------------------------------------------------------------

    pub fn get_receipt(&self, id: i64) -> Result<Option<Receipt>, StoreError> {
        let sql = format!("SELECT {RECEIPT_COLUMNS} FROM receipt WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::row_to_receipt)
            .optional()?)
    }

    /// All receipts, oldest first.
    pub fn list_receipts(&self) -> Result<Vec<Receipt>, StoreError> {
        let sql = format!("SELECT {RECEIPT_COLUMNS} FROM receipt ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_receipt)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(StoreCounts {
            files_total: count("SELECT COUNT(*) FROM receipt_file")?,
            files_valid: count("SELECT COUNT(*) FROM receipt_file WHERE is_valid = 1")?,
            files_processed: count("SELECT COUNT(*) FROM receipt_file WHERE is_processed = 1")?,
            receipts: count("SELECT COUNT(*) FROM receipt")?,
        })
    }

    /// Helper: map a row with the receipt projection to `Receipt`.
    fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
        Ok(Receipt {
            id: row.get(0)?,
            purchased_at: row.get(1)?,
            merchant_name: row.get(2)?,
            total_amount: row.get(3)?,
            file_path: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReceiptFileRecord> {
        Ok(ReceiptFileRecord {
            id: row.get(0)?,
            file_name: row.get(1)?,
            file_path: row.get(2)?,
            sha256: row.get(3)?,
            is_valid: row.get(4)?,
            invalid_reason: row.get(5)?,
            is_processed: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl RecordStore for ReceiptStore {
    fn find_by_natural_key(&self, key: NaturalKey<'_>) -> Result<Option<Receipt>, StoreError> {
        let sql = format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipt
             WHERE purchased_at = ?1 AND merchant_name = ?2 AND total_amount = ?3"
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                params![key.purchased_at, key.merchant_name, key.total_amount],
                Self::row_to_receipt,
            )
            .optional()?)
    }

    fn insert_receipt(&self, new: &NewReceipt) -> Result<Receipt, StoreError> {
        let now = OffsetDateTime::now_utc();
        self.conn.execute(
            "INSERT INTO receipt
                (purchased_at, merchant_name, total_amount, file_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                new.purchased_at,
                new.merchant_name,
                new.total_amount,
                new.file_path,
                now,
            ],
        )?;
        Ok(Receipt {
            id: self.conn.last_insert_rowid(),
            purchased_at: new.purchased_at.clone(),
            merchant_name: new.merchant_name.clone(),
            total_amount: new.total_amount.clone(),
            file_path: new.file_path.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn update_file_path(&self, id: i64, file_path: &str) -> Result<Receipt, StoreError> {
        let changed = self.conn.execute(
            "UPDATE receipt SET file_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![file_path, OffsetDateTime::now_utc(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.get_receipt(id)?.ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::extract_fields;
    use crate::reconcile::{ReconcileOutcome, reconcile};

    fn new_receipt(date: &str, merchant: &str, amount: &str, path: &str) -> NewReceipt {
        NewReceipt {
            purchased_at: date.into(),
            merchant_name: merchant.into(),
            total_amount: amount.into(),
            file_path: path.into(),
        }
    }

    #[test]
    fn test_hash_is_stable() {
        let a = ReceiptStore::hash_bytes(b"%PDF-1.4 test");
        let b = ReceiptStore::hash_bytes(b"%PDF-1.4 test");
        let c = ReceiptStore::hash_bytes(b"%PDF-1.5 test");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_insert_then_find_by_key() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let inserted = store
            .insert_receipt(&new_receipt("2024-01-01", "Shop", "5.00", "a.pdf"))
            .unwrap();

        let key = NaturalKey {
            purchased_at: "2024-01-01",
            merchant_name: "Shop",
            total_amount: "5.00",
        };
        let found = store.find_by_natural_key(key).unwrap().unwrap();
        assert_eq!(found.id, inserted.id);
        assert_eq!(found.file_path, "a.pdf");

        let miss = NaturalKey {
            total_amount: "5.0",
            ..key
        };
        assert!(store.find_by_natural_key(miss).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_key_is_constraint_violation() {
        let store = ReceiptStore::open_in_memory().unwrap();
        store
            .insert_receipt(&new_receipt("2024-01-01", "Shop", "5.00", "a.pdf"))
            .unwrap();
        let err = store
            .insert_receipt(&new_receipt("2024-01-01", "Shop", "5.00", "b.pdf"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_update_keeps_created_at() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let r = store
            .insert_receipt(&new_receipt("2024-01-01", "Shop", "5.00", "a.pdf"))
            .unwrap();
        let before = store.get_receipt(r.id).unwrap().unwrap();
        let updated = store.update_file_path(r.id, "b.pdf").unwrap();
        assert_eq!(updated.file_path, "b.pdf");
        assert_eq!(updated.created_at, before.created_at);
        assert!(updated.updated_at >= before.updated_at);
    }

    #[test]
    fn test_update_missing_row() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let err = store.update_file_path(42, "x.pdf").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn test_reconcile_against_sqlite() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let f = extract_fields("Hardware Hut\n2024-05-05\nTotal 1,020.00");

        let first = reconcile(&f, "uploads/one.pdf", &store).unwrap();
        let second = reconcile(&f, "uploads/two.pdf", &store).unwrap();
        assert_eq!(first.outcome, ReconcileOutcome::Inserted);
        assert_eq!(second.outcome, ReconcileOutcome::Updated);

        let all = store.list_receipts().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_path, "uploads/two.pdf");
        assert_eq!(all[0].total_amount, "1,020.00");

        let other = extract_fields("Hardware Hut\n2024-05-06\nTotal 1,020.00");
        reconcile(&other, "uploads/three.pdf", &store).unwrap();
        assert_eq!(store.list_receipts().unwrap().len(), 2);
    }

    #[test]
    fn test_find_file_by_sha256_returns_earliest() {
        let store = ReceiptStore::open_in_memory().unwrap();
        assert!(store.find_file_by_sha256("abc").unwrap().is_none());

        let first = store.insert_file("a.pdf", "uploads/a.pdf", "abc").unwrap();
        store.insert_file("b.pdf", "uploads/b.pdf", "abc").unwrap();
        store.insert_file("c.pdf", "uploads/c.pdf", "def").unwrap();

        let found = store.find_file_by_sha256("abc").unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(found.file_name, "a.pdf");
    }

    #[test]
    fn test_file_lifecycle() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let file = store.insert_file("r.pdf", "uploads/r.pdf", "abc").unwrap();
        assert!(!file.is_valid);
        let stored = store.get_file(file.id).unwrap().unwrap();

        store
            .set_file_validity(file.id, false, Some("File is not a valid PDF"))
            .unwrap();
        let f = store.get_file(file.id).unwrap().unwrap();
        assert_eq!(f.invalid_reason.as_deref(), Some("File is not a valid PDF"));

        store.set_file_validity(file.id, true, Some("ignored")).unwrap();
        store.mark_file_processed(file.id).unwrap();
        let f = store.get_file(file.id).unwrap().unwrap();
        assert!(f.is_valid);
        assert!(f.is_processed);
        assert!(f.invalid_reason.is_none());
        assert_eq!(f.created_at, stored.created_at);

        let counts = store.counts().unwrap();
        assert_eq!(counts.files_total, 1);
        assert_eq!(counts.files_valid, 1);
        assert_eq!(counts.files_processed, 1);
        assert_eq!(counts.receipts, 0);

        assert!(store.get_file(99).unwrap().is_none());
        assert!(matches!(
            store.mark_file_processed(99),
            Err(StoreError::NotFound(99))
        ));
    }

    #[test]
    fn test_rolled_back_transaction_leaves_no_receipt() {
        let store = ReceiptStore::open_in_memory().unwrap();
        {
            let _tx = store.begin_immediate().unwrap();
            store
                .insert_receipt(&new_receipt("2024-01-01", "Shop", "5.00", "a.pdf"))
                .unwrap();
            // dropped without commit
        }
        assert!(store.list_receipts().unwrap().is_empty());
    }
}
