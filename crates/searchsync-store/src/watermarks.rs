use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use searchsync_core::error::{Error, Result};
use searchsync_core::traits::WatermarkStore;
use searchsync_core::types::Sequence;

use crate::store::{from_seq, to_seq, SqliteStore};

impl WatermarkStore for SqliteStore {
    fn load(&self, consumer: &str) -> Result<Sequence> {
        let conn = self.lock()?;
        let seq: Option<i64> = conn
            .query_row("SELECT seq FROM watermarks WHERE consumer = ?1", [consumer], |row| row.get(0))
            .optional()
            .map_err(Error::store)?;
        Ok(seq.map(to_seq).unwrap_or(0))
    }

    fn advance(&self, consumer: &str, expected: Sequence, to: Sequence) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(Error::store)?;
        tx.execute("INSERT INTO watermarks (consumer, seq) VALUES (?1, 0) ON CONFLICT(consumer) DO NOTHING", [consumer])
            .map_err(Error::store)?;
        let changed = tx
            .execute(
                "UPDATE watermarks SET seq = ?3 WHERE consumer = ?1 AND seq = ?2",
                params![consumer, from_seq(expected), from_seq(to)],
            )
            .map_err(Error::store)?;
        if changed == 0 {
            let found: i64 = tx
                .query_row("SELECT seq FROM watermarks WHERE consumer = ?1", [consumer], |row| row.get(0))
                .map_err(Error::store)?;
            return Err(Error::WatermarkConflict { consumer: consumer.to_string(), expected, found: to_seq(found) });
        }
        tx.commit().map_err(Error::store)?;
        tracing::debug!(consumer, from = expected, to, "watermark advanced");
        Ok(())
    }

    fn try_lock(&self, consumer: &str, holder: &str, lease: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let stale_before = now - i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(Error::store)?;
        tx.execute("INSERT INTO watermarks (consumer, seq) VALUES (?1, 0) ON CONFLICT(consumer) DO NOTHING", [consumer])
            .map_err(Error::store)?;
        let taken = tx
            .execute(
                "UPDATE watermarks SET holder = ?2, locked_at = ?3 \
                 WHERE consumer = ?1 AND (holder IS NULL OR locked_at < ?4)",
                params![consumer, holder, now, stale_before],
            )
            .map_err(Error::store)?;
        tx.commit().map_err(Error::store)?;
        if taken == 1 {
            tracing::debug!(consumer, holder, "lease taken");
        }
        Ok(taken == 1)
    }

    fn unlock(&self, consumer: &str, holder: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE watermarks SET holder = NULL, locked_at = NULL WHERE consumer = ?1 AND holder = ?2",
            [consumer, holder],
        )
        .map_err(Error::store)?;
        Ok(())
    }

    fn consumers(&self) -> Result<Vec<(String, Sequence)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT consumer, seq FROM watermarks ORDER BY consumer").map_err(Error::store)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(Error::store)?;
        let mut out = Vec::new();
        for row in rows {
            let (consumer, seq) = row.map_err(Error::store)?;
            out.push((consumer, to_seq(seq)));
        }
        Ok(out)
    }
}
