use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};

use searchsync_core::error::{Error, Result};
use searchsync_core::traits::ChangeLog;
use searchsync_core::types::{ChangeLogEntry, Operation, RecordKey, RecordType, Sequence};

use crate::store::{append_in, from_seq, to_seq, SqliteStore};

impl ChangeLog for SqliteStore {
    /// For producers that write their records elsewhere.
    fn append(&self, record_type: &RecordType, key: &RecordKey, operation: Operation) -> Result<Sequence> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(Error::store)?;
        let seq = append_in(&tx, record_type, key, operation)?;
        tx.commit().map_err(Error::store)?;
        Ok(seq)
    }

    fn read_after(&self, after: Sequence, limit: usize) -> Result<Vec<ChangeLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT seq, record_type, record_key, operation, created_at FROM change_log \
                 WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )
            .map_err(Error::store)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![from_seq(after), limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, DateTime<Utc>>(4)?,
                ))
            })
            .map_err(Error::store)?;

        let mut entries = Vec::new();
        for row in rows {
            let (seq, record_type, key, code, created_at) = row.map_err(Error::store)?;
            let operation = Operation::from_code(code)
                .ok_or_else(|| Error::Store(format!("change log entry {seq} has unknown operation {code}")))?;
            entries.push(ChangeLogEntry {
                seq: to_seq(seq),
                record_type: RecordType::new(record_type)?,
                key: RecordKey::new(key),
                operation,
                created_at,
            });
        }
        Ok(entries)
    }

    fn head(&self) -> Result<Sequence> {
        let conn = self.lock()?;
        // sqlite_sequence survives pruning, MAX(seq) would not
        let head: i64 = conn
            .query_row(
                "SELECT IFNULL((SELECT seq FROM sqlite_sequence WHERE name = 'change_log'), 0)",
                [],
                |row| row.get(0),
            )
            .map_err(Error::store)?;
        Ok(to_seq(head))
    }

    fn count_after(&self, after: Sequence) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM change_log WHERE seq > ?1", [from_seq(after)], |row| row.get(0))
            .map_err(Error::store)?;
        Ok(to_seq(n))
    }

    fn prune_through(&self, through: Sequence) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM change_log WHERE seq <= ?1", [from_seq(through)])
            .map_err(Error::store)?;
        tracing::info!(through, removed, "pruned change log");
        Ok(removed)
    }
}
