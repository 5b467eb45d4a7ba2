//! Record store adapter: patient id → last update, model label, sample counter.

use crate::error::IdentityError;
use crate::patient::{PatientId, PatientRecord};
use chrono::{DateTime, Utc};
use healid_core::Label;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Persistent patient record store.
///
/// Implementations must be safe to share between request threads.
pub trait RecordStore: Send + Sync {
    fn find_record(&self, id: PatientId) -> Result<Option<PatientRecord>, IdentityError>;

    /// Insert the record, or refresh `last_updated` if it already exists.
    fn upsert_record(&self, id: PatientId, at: DateTime<Utc>) -> Result<(), IdentityError>;

    fn clear_all_labels(&self) -> Result<(), IdentityError>;

    fn set_label(&self, id: PatientId, label: Label) -> Result<(), IdentityError>;

    /// All records in ascending id order.
    fn list_records(&self) -> Result<Vec<PatientRecord>, IdentityError>;

    /// Hand out the next face sample sequence number for `id`, creating the
    /// record if needed. Each call returns a distinct number.
    fn allocate_sample_seq(&self, id: PatientId, at: DateTime<Utc>) -> Result<u32, IdentityError>;

    /// Returns whether a record was removed.
    fn delete_record(&self, id: PatientId) -> Result<bool, IdentityError>;

    /// Clear every label, then label each of `trained` with its own id.
    fn replace_labels(&self, trained: &[PatientId]) -> Result<(), IdentityError> {
        self.clear_all_labels()?;
        for id in trained {
            self.set_label(*id, id.label())?;
        }
        Ok(())
    }

    /// Current label → patient projection.
    fn label_map(&self) -> Result<HashMap<Label, PatientId>, IdentityError> {
        Ok(self
            .list_records()?
            .into_iter()
            .filter_map(|r| r.label.map(|label| (label, r.id)))
            .collect())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS patients (
    id              INTEGER PRIMARY KEY,
    last_updated    TEXT NOT NULL,
    model_label     INTEGER UNIQUE,
    next_sample_seq INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS retired_sample_seqs (
    id              INTEGER PRIMARY KEY,
    next_sample_seq INTEGER NOT NULL
);";

/// Sequence a newly inserted row starts from: where a deleted record with
/// the same id left off, else 0.
const INITIAL_SEQ: &str =
    "(SELECT COALESCE(MAX(next_sample_seq), 0) FROM retired_sample_seqs WHERE id = ?1)";

const SELECT_RECORD: &str = "SELECT id, last_updated, model_label, next_sample_seq FROM patients";

/// SQLite-backed record store. One connection, serialized behind a mutex.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self, IdentityError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                IdentityError::StoreUnavailable(format!("{}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)?;
        // journal_mode returns a row, so it cannot go through execute_batch
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let store = Self::init(conn)?;
        match store.journal_mode() {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") => {}
            Ok(mode) => tracing::warn!(
                path = %path.display(),
                journal_mode = %mode,
                "record store is not in WAL mode, concurrent readers will block"
            ),
            Err(e) => tracing::warn!(error = %e, "cannot read record store journal mode"),
        }

        tracing::info!(path = %path.display(), "opened patient record store");
        Ok(store)
    }

    pub fn journal_mode(&self) -> Result<String, IdentityError> {
        let mode = self
            .lock()
            .pragma_query_value(None, "journal_mode", |row| row.get(0))?;
        Ok(mode)
    }

    pub fn open_in_memory() -> Result<Self, IdentityError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IdentityError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("record store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PatientRecord> {
    let raw: String = row.get(1)?;
    let last_updated = DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(PatientRecord {
        id: PatientId::new(row.get(0)?),
        last_updated,
        label: row.get(2)?,
        next_sample_seq: row.get(3)?,
    })
}

impl RecordStore for SqliteRecordStore {
    fn find_record(&self, id: PatientId) -> Result<Option<PatientRecord>, IdentityError> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!("{SELECT_RECORD} WHERE id = ?1"),
                params![id.get()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert_record(&self, id: PatientId, at: DateTime<Utc>) -> Result<(), IdentityError> {
        self.lock().execute(
            &format!(
                "INSERT INTO patients (id, last_updated, next_sample_seq) VALUES (?1, ?2, {INITIAL_SEQ})
                 ON CONFLICT(id) DO UPDATE SET last_updated = excluded.last_updated"
            ),
            params![id.get(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_all_labels(&self) -> Result<(), IdentityError> {
        self.lock()
            .execute("UPDATE patients SET model_label = NULL", [])?;
        Ok(())
    }

    fn set_label(&self, id: PatientId, label: Label) -> Result<(), IdentityError> {
        self.lock().execute(
            "UPDATE patients SET model_label = ?2 WHERE id = ?1",
            params![id.get(), label],
        )?;
        Ok(())
    }

    fn list_records(&self) -> Result<Vec<PatientRecord>, IdentityError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_RECORD} ORDER BY id ASC"))?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn allocate_sample_seq(&self, id: PatientId, at: DateTime<Utc>) -> Result<u32, IdentityError> {
        let seq = self.lock().query_row(
            &format!(
                "INSERT INTO patients (id, last_updated, next_sample_seq) VALUES (?1, ?2, {INITIAL_SEQ} + 1)
                 ON CONFLICT(id) DO UPDATE SET next_sample_seq = next_sample_seq + 1
                 RETURNING next_sample_seq - 1"
            ),
            params![id.get(), at.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// The sample counter outlives the row, so a re-registered patient
    /// never gets a sequence number that was handed out before.
    fn delete_record(&self, id: PatientId) -> Result<bool, IdentityError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO retired_sample_seqs (id, next_sample_seq)
             SELECT id, next_sample_seq FROM patients WHERE id = ?1
             ON CONFLICT(id) DO UPDATE SET next_sample_seq = excluded.next_sample_seq",
            params![id.get()],
        )?;
        let removed = tx.execute("DELETE FROM patients WHERE id = ?1", params![id.get()])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Applied as one transaction so readers never see a half-relabelled store.
    fn replace_labels(&self, trained: &[PatientId]) -> Result<(), IdentityError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("UPDATE patients SET model_label = NULL", [])?;
        {
            let mut stmt = tx.prepare("UPDATE patients SET model_label = ?2 WHERE id = ?1")?;
            for id in trained {
                stmt.execute(params![id.get(), id.label()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
