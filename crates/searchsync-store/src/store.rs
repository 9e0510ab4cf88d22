use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};

use searchsync_core::error::{Error, Result};
use searchsync_core::predicate::Predicate;
use searchsync_core::traits::RecordStore;
use searchsync_core::types::{Operation, Record, RecordKey, RecordType, Sequence};

use crate::predicate_sql::where_clause;

const SCAN_PAGE: usize = 500;
const FETCH_CHUNK: usize = 500;

/// Records, change log and watermarks in one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    tracked: Option<BTreeSet<RecordType>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(Error::store)?;
        }
        let conn = Connection::open(path).map_err(Error::store)?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "opened record store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(Error::store)?)
    }

    /// Only log mutations of these types. By default every mutation is logged.
    pub fn track_only(mut self, types: impl IntoIterator<Item = RecordType>) -> Self {
        self.tracked = Some(types.into_iter().collect());
        self
    }

    fn init(conn: Connection) -> Result<Self> {
        // in-memory databases answer "memory" here, which is fine
        conn.pragma_update(None, "journal_mode", "WAL").map_err(Error::store)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(Error::store)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                record_type TEXT NOT NULL,
                record_key TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (record_type, record_key)
            );

            CREATE TABLE IF NOT EXISTS change_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                record_type TEXT NOT NULL,
                record_key TEXT NOT NULL,
                operation INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watermarks (
                consumer TEXT PRIMARY KEY,
                seq INTEGER NOT NULL DEFAULT 0,
                holder TEXT,
                locked_at INTEGER
            );
            "#,
        )
        .map_err(Error::store)?;
        tracing::debug!("record store schema ready");
        Ok(Self { conn: Mutex::new(conn), tracked: None })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Store("connection mutex poisoned".into()))
    }

    fn tracks(&self, record_type: &RecordType) -> bool {
        self.tracked.as_ref().map_or(true, |types| types.contains(record_type))
    }

    /// Insert or overwrite a record and log it as `Added` or `Updated`.
    pub fn save(&self, record: &Record) -> Result<Operation> {
        let data = serde_json::to_string(&record.data).map_err(Error::store)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(Error::store)?;
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM records WHERE record_type = ?1 AND record_key = ?2)",
                params![record.record_type.as_str(), record.key.as_str()],
                |row| row.get(0),
            )
            .map_err(Error::store)?;
        tx.execute(
            r#"
            INSERT INTO records (record_type, record_key, data, updated_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(record_type, record_key) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![record.record_type.as_str(), record.key.as_str(), data, Utc::now()],
        )
        .map_err(Error::store)?;
        let operation = if exists { Operation::Updated } else { Operation::Added };
        if self.tracks(&record.record_type) {
            append_in(&tx, &record.record_type, &record.key, operation)?;
        }
        tx.commit().map_err(Error::store)?;
        Ok(operation)
    }

    /// Remove a record and log `Deleted`. Returns whether it existed.
    pub fn delete(&self, record_type: &RecordType, key: &RecordKey) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(Error::store)?;
        let removed = tx
            .execute(
                "DELETE FROM records WHERE record_type = ?1 AND record_key = ?2",
                params![record_type.as_str(), key.as_str()],
            )
            .map_err(Error::store)?;
        if removed > 0 && self.tracks(record_type) {
            append_in(&tx, record_type, key, Operation::Deleted)?;
        }
        tx.commit().map_err(Error::store)?;
        Ok(removed > 0)
    }

    pub fn count(&self, record_type: &RecordType) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM records WHERE record_type = ?1", [record_type.as_str()], |row| {
                row.get(0)
            })
            .map_err(Error::store)?;
        Ok(u64::try_from(n).unwrap_or_default())
    }
}

/// Insert one log row inside an open transaction.
pub(crate) fn append_in(
    tx: &Transaction<'_>,
    record_type: &RecordType,
    key: &RecordKey,
    operation: Operation,
) -> Result<Sequence> {
    tx.execute(
        "INSERT INTO change_log (record_type, record_key, operation, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![record_type.as_str(), key.as_str(), operation.code(), Utc::now()],
    )
    .map_err(|e| Error::LogAppend {
        record_type: record_type.to_string(),
        key: key.to_string(),
        message: e.to_string(),
    })?;
    Ok(to_seq(tx.last_insert_rowid()))
}

pub(crate) fn to_seq(n: i64) -> Sequence {
    Sequence::try_from(n).unwrap_or_default()
}

pub(crate) fn from_seq(seq: Sequence) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

fn parse_data(record_type: &RecordType, key: String, data: &str) -> Result<Record> {
    let data = serde_json::from_str(data).map_err(|e| Error::Store(format!("{record_type} #{key}: {e}")))?;
    Ok(Record::new(record_type.clone(), key, data))
}

impl RecordStore for SqliteStore {
    fn fetch(&self, record_type: &RecordType, key: &RecordKey) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM records WHERE record_type = ?1 AND record_key = ?2",
                params![record_type.as_str(), key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::store)?;
        data.map(|d| parse_data(record_type, key.to_string(), &d)).transpose()
    }

    fn fetch_many(&self, record_type: &RecordType, keys: &[RecordKey]) -> Result<Vec<Record>> {
        let conn = self.lock()?;
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT record_key, data FROM records WHERE record_type = ? AND record_key IN ({placeholders})"
            );
            let mut params: Vec<SqlValue> = Vec::with_capacity(chunk.len() + 1);
            params.push(SqlValue::Text(record_type.to_string()));
            params.extend(chunk.iter().map(|k| SqlValue::Text(k.to_string())));

            let mut stmt = conn.prepare(&sql).map_err(Error::store)?;
            let rows = stmt
                .query_map(params_from_iter(params), |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(Error::store)?;
            for row in rows {
                let (key, data) = row.map_err(Error::store)?;
                out.push(parse_data(record_type, key, &data)?);
            }
        }
        Ok(out)
    }

    /// Paged by rowid so the connection is never held while `visit` runs.
    fn scan(
        &self,
        record_type: &RecordType,
        predicate: &Predicate,
        visit: &mut dyn FnMut(Record) -> Result<()>,
    ) -> Result<usize> {
        let mut params = Vec::new();
        let filter = where_clause(predicate, &mut params);
        let sql = format!(
            "SELECT rowid, record_key, data FROM records \
             WHERE record_type = ? AND rowid > ? AND ({filter}) \
             ORDER BY rowid LIMIT {SCAN_PAGE}"
        );

        let mut last_rowid: i64 = 0;
        let mut visited = 0;
        loop {
            let page: Vec<(i64, String, String)> = {
                let conn = self.lock()?;
                let mut stmt = conn.prepare_cached(&sql).map_err(Error::store)?;
                let mut bound = vec![SqlValue::Text(record_type.to_string()), SqlValue::Integer(last_rowid)];
                bound.extend(params.iter().cloned());
                let rows = stmt
                    .query_map(params_from_iter(bound), |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                    .map_err(Error::store)?;
                let page = rows.collect::<rusqlite::Result<_>>().map_err(Error::store)?;
                page
            };
            let done = page.len() < SCAN_PAGE;
            for (rowid, key, data) in page {
                last_rowid = rowid;
                visit(parse_data(record_type, key, &data)?)?;
                visited += 1;
            }
            if done {
                return Ok(visited);
            }
        }
    }
}
