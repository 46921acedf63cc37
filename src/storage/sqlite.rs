//! SQLite storage adapter.
//!
//! One row per record: the full JSON view as text, with `last_modified` and
//! `_status` duplicated into indexed columns. Metadata and the last-modified
//! high-water mark live in a separate key/value table so `clear()` can drop
//! records without touching them.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{KintoError, Result};
use crate::types::Record;

use super::traits::{matches_filters, sort_records, ListParams, StorageAdapter, StorageProxy};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id            TEXT PRIMARY KEY,
    record        TEXT NOT NULL,
    last_modified INTEGER,
    status        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_last_modified ON records(last_modified);
CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

pub struct SqliteAdapter {
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_meta(conn: &Connection, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(v) => {
                conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                    params![key, v],
                )?;
            }
            None => {
                conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
            }
        }
        Ok(())
    }

    fn row_to_record(json: String) -> Result<Record> {
        let value: Value = serde_json::from_str(&json)?;
        Record::from_json(value)
    }
}

fn put_record(conn: &Connection, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO records (id, record, last_modified, status)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            record.id,
            record.to_json().to_string(),
            record.last_modified.map(|v| v as i64),
            record.status.as_str(),
        ],
    )?;
    Ok(())
}

// ============================================================================
// Transaction proxy
// ============================================================================

struct SqliteTransaction<'a> {
    tx: &'a rusqlite::Transaction<'a>,
    preloaded: HashMap<String, Record>,
    /// Rows written during this transaction, readable regardless of preload.
    written: HashMap<String, Option<Record>>,
}

impl StorageProxy for SqliteTransaction<'_> {
    fn create(&mut self, record: Record) -> Result<()> {
        let gone_in_tx = matches!(self.written.get(&record.id), Some(None));
        if !gone_in_tx {
            let exists: Option<i64> = self
                .tx
                .query_row(
                    "SELECT 1 FROM records WHERE id = ?1",
                    params![record.id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() || matches!(self.written.get(&record.id), Some(Some(_))) {
                return Err(KintoError::ConflictingCreate(record.id));
            }
        }
        put_record(self.tx, &record)?;
        self.written.insert(record.id.clone(), Some(record));
        Ok(())
    }

    fn update(&mut self, record: Record) -> Result<()> {
        put_record(self.tx, &record)?;
        self.written.insert(record.id.clone(), Some(record));
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        self.tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
        self.written.insert(id.to_string(), None);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Record>> {
        if let Some(entry) = self.written.get(id) {
            return Ok(entry.clone());
        }
        if let Some(record) = self.preloaded.get(id) {
            return Ok(Some(record.clone()));
        }
        // Same contract as the in-memory adapter: an existing row that was
        // not preloaded is a programming error, a missing row is just absent.
        let exists: Option<i64> = self
            .tx
            .query_row("SELECT 1 FROM records WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_some() {
            return Err(KintoError::storage(format!(
                "record {id} was not preloaded for this transaction"
            )));
        }
        Ok(None)
    }
}

// ============================================================================
// StorageAdapter implementation
// ============================================================================

impl StorageAdapter for SqliteAdapter {
    fn clear(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM records", [])?;
        Ok(())
    }

    fn execute(
        &self,
        preload: &[String],
        body: &mut dyn FnMut(&mut dyn StorageProxy) -> Result<()>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut preloaded = HashMap::new();
        {
            let mut stmt = tx.prepare("SELECT record FROM records WHERE id = ?1")?;
            for id in preload {
                let row: Option<String> = stmt
                    .query_row(params![id], |row| row.get(0))
                    .optional()?;
                if let Some(json) = row {
                    preloaded.insert(id.clone(), Self::row_to_record(json)?);
                }
            }
        }

        let mut proxy = SqliteTransaction {
            tx: &tx,
            preloaded,
            written: HashMap::new(),
        };
        body(&mut proxy)?;
        // On error the transaction drops and rolls back.
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .query_row("SELECT record FROM records WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        row.map(Self::row_to_record).transpose()
    }

    fn list(&self, params: &ListParams) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT record FROM records")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut matched = Vec::new();
        for row in rows {
            let record = Self::row_to_record(row?)?;
            if matches_filters(&record.to_json(), &params.filters) {
                matched.push(record);
            }
        }
        drop(stmt);
        drop(conn);
        sort_records(&mut matched, &params.order);
        Ok(matched)
    }

    fn save_last_modified(&self, last_modified: Option<u64>) -> Result<Option<u64>> {
        let conn = self.conn.lock();
        Self::set_meta(
            &conn,
            "last_modified",
            last_modified.map(|v| v.to_string()).as_deref(),
        )?;
        Ok(last_modified)
    }

    fn get_last_modified(&self) -> Result<Option<u64>> {
        let conn = self.conn.lock();
        Ok(Self::get_meta(&conn, "last_modified")?.and_then(|v| v.parse().ok()))
    }

    fn import_bulk(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for record in &records {
            put_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(records)
    }

    fn save_metadata(&self, metadata: Option<Value>) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        Self::set_meta(
            &conn,
            "metadata",
            metadata.as_ref().map(|v| v.to_string()).as_deref(),
        )?;
        Ok(metadata)
    }

    fn get_metadata(&self) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        Self::get_meta(&conn, "metadata")?
            .map(|v| serde_json::from_str(&v).map_err(KintoError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordStatus;
    use serde_json::{json, Map};

    fn record(id: &str, status: RecordStatus, data: Value) -> Record {
        Record::new(
            id.to_string(),
            None,
            status,
            data.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn execute_commits_and_rolls_back() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .execute(&[], &mut |tx| {
                tx.create(record("a", RecordStatus::Created, json!({"title": "foo"})))
            })
            .unwrap();
        assert!(adapter.get("a").unwrap().is_some());

        let result = adapter.execute(&[], &mut |tx| {
            tx.update(record("a", RecordStatus::Updated, json!({"title": "bar"})))?;
            Err(KintoError::storage("boom"))
        });
        assert!(result.is_err());
        assert_eq!(adapter.get("a").unwrap().unwrap().data["title"], json!("foo"));
    }

    #[test]
    fn proxy_get_requires_preload() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter.import_bulk(vec![record("a", RecordStatus::Synced, json!({}))]).unwrap();

        let result = adapter.execute(&[], &mut |tx| {
            tx.get("a")?;
            Ok(())
        });
        assert!(result.is_err());

        adapter
            .execute(&["a".to_string()], &mut |tx| {
                assert!(tx.get("a")?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn create_rejects_existing_id() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter.import_bulk(vec![record("a", RecordStatus::Synced, json!({}))]).unwrap();
        let result = adapter.execute(&[], &mut |tx| {
            tx.create(record("a", RecordStatus::Created, json!({})))
        });
        assert!(matches!(result, Err(KintoError::ConflictingCreate(_))));
    }

    #[test]
    fn list_filters_and_orders() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .import_bulk(vec![
                Record::new("a".into(), Some(2), RecordStatus::Synced, Map::new()),
                Record::new("b".into(), Some(3), RecordStatus::Deleted, Map::new()),
                Record::new("c".into(), Some(1), RecordStatus::Synced, Map::new()),
            ])
            .unwrap();

        let mut filters = Map::new();
        filters.insert("_status".to_string(), json!("synced"));
        let listed = adapter.list(&ListParams::filtered(filters)).unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn clear_keeps_meta() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter.import_bulk(vec![record("a", RecordStatus::Synced, json!({}))]).unwrap();
        adapter.save_last_modified(Some(42)).unwrap();
        adapter.save_metadata(Some(json!({"schema": 1}))).unwrap();

        adapter.clear().unwrap();

        assert!(adapter.get("a").unwrap().is_none());
        assert_eq!(adapter.get_last_modified().unwrap(), Some(42));
        assert_eq!(adapter.get_metadata().unwrap(), Some(json!({"schema": 1})));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kinto.db");

        {
            let adapter = SqliteAdapter::open(&path).unwrap();
            adapter
                .import_bulk(vec![Record::new(
                    "a".into(),
                    Some(7),
                    RecordStatus::Synced,
                    json!({"title": "foo"}).as_object().unwrap().clone(),
                )])
                .unwrap();
            adapter.save_last_modified(Some(7)).unwrap();
        }

        let adapter = SqliteAdapter::open(&path).unwrap();
        let stored = adapter.get("a").unwrap().unwrap();
        assert_eq!(stored.last_modified, Some(7));
        assert_eq!(stored.data["title"], json!("foo"));
        assert_eq!(adapter.get_last_modified().unwrap(), Some(7));
    }
}
