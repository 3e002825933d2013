//! SQLite-backed [`ThreadMirror`]

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{DbConn, DbPool};
use crate::thread::{MessageEntry, MessageRole, StoredThread, ThreadId, ThreadMirror};
use crate::{Error, Result};

/// Thread mirror repository
#[derive(Clone)]
pub struct SqliteThreadMirror {
    pool: DbPool,
}

impl SqliteThreadMirror {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }
}

impl ThreadMirror for SqliteThreadMirror {
    fn create(&self, id: &ThreadId, created_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let at = created_at.timestamp_millis();
        conn.execute(
            "INSERT OR IGNORE INTO threads (id, created_at, last_active_at) VALUES (?1, ?2, ?2)",
            params![id.to_string(), at],
        )?;
        Ok(())
    }

    fn append(
        &self,
        id: &ThreadId,
        entries: &[MessageEntry],
        retained_from: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let thread_id = id.to_string();
        let at = at.timestamp_millis();

        tx.execute(
            "INSERT INTO threads (id, created_at, last_active_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE
             SET last_active_at = MAX(last_active_at, excluded.last_active_at)",
            params![thread_id, at],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO thread_messages (thread_id, seq, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    thread_id,
                    to_sql_seq(entry.seq)?,
                    entry.role.as_str(),
                    entry.content,
                    at
                ])?;
            }
        }

        tx.execute(
            "DELETE FROM thread_messages WHERE thread_id = ?1 AND seq < ?2",
            params![thread_id, to_sql_seq(retained_from)?],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn touch(&self, id: &ThreadId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE threads SET last_active_at = MAX(last_active_at, ?2) WHERE id = ?1",
            params![id.to_string(), at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn load(&self, id: &ThreadId, limit: usize) -> Result<Option<StoredThread>> {
        let conn = self.conn()?;
        let thread_id = id.to_string();

        let Some((created_at, last_active_at)) = conn
            .query_row(
                "SELECT created_at, last_active_at FROM threads WHERE id = ?1",
                [&thread_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?
        else {
            return Ok(None);
        };

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT seq, role, content FROM thread_messages
             WHERE thread_id = ?1 ORDER BY seq DESC LIMIT ?2",
        )?;
        let mut entries = stmt
            .query_map(params![thread_id, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .filter_map(std::result::Result::ok)
            .filter_map(|(seq, role, content)| {
                Some(MessageEntry {
                    role: MessageRole::parse(&role)?,
                    content,
                    seq: u64::try_from(seq).ok()?,
                })
            })
            .collect::<Vec<_>>();
        entries.reverse();

        Ok(Some(StoredThread {
            id: *id,
            created_at: from_millis(created_at),
            last_active_at: from_millis(last_active_at),
            entries,
        }))
    }

    fn active_since(&self, since: DateTime<Utc>) -> Result<Vec<ThreadId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM threads WHERE last_active_at >= ?1 ORDER BY last_active_at DESC",
        )?;
        let ids = stmt
            .query_map([since.timestamp_millis()], |row| row.get::<_, String>(0))?
            .filter_map(std::result::Result::ok)
            .filter_map(|raw| ThreadId::parse(&raw))
            .collect();
        Ok(ids)
    }

    fn delete(&self, id: &ThreadId) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let thread_id = id.to_string();
        tx.execute("DELETE FROM thread_messages WHERE thread_id = ?1", [&thread_id])?;
        tx.execute("DELETE FROM threads WHERE id = ?1", [&thread_id])?;
        tx.commit()?;
        Ok(())
    }

    fn purge_inactive(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cutoff = cutoff.timestamp_millis();
        tx.execute(
            "DELETE FROM thread_messages WHERE thread_id IN
             (SELECT id FROM threads WHERE last_active_at < ?1)",
            [cutoff],
        )?;
        let purged = tx.execute("DELETE FROM threads WHERE last_active_at < ?1", [cutoff])?;
        tx.commit()?;
        Ok(purged)
    }

    fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

fn to_sql_seq(seq: u64) -> Result<i64> {
    i64::try_from(seq).map_err(|_| Error::Database(format!("sequence number out of range: {seq}")))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
