//! Local SQLite cache for conversations, artifacts, queued sync work and metadata.
//!
//! Always available, independent of connectivity. Every write is committed
//! with `synchronous = FULL` before the call returns.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    AppError, ArtifactRecord, ArtifactReference, Conversation, Result, SyncOperation,
    SyncQueueEntry,
};

/// Embedded keyed store with four collections.
pub struct LocalCache {
    conn: Mutex<Connection>,
}

impl LocalCache {
    /// Opens or creates the cache database.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or schema creation fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create cache directory", e))?;
        }

        let conn = Connection::open(path).map_err(|e| match e {
            rusqlite::Error::SqliteFailure(..) => AppError::CacheUnavailable {
                path: path.to_path_buf(),
            },
            other => AppError::database(other),
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )
        .map_err(AppError::database)?;

        Self::with_connection(conn)
    }

    /// Opens a throwaway in-memory cache.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::database)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AppError::Database {
            message: "cache connection lock poisoned".into(),
            source: None,
        })
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                last_modified INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS artifacts (
                name TEXT PRIMARY KEY,
                mime_type TEXT NOT NULL,
                data BLOB NOT NULL,
                reference TEXT,
                temporary INTEGER NOT NULL DEFAULT 0,
                cached_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                op_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                revision INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_last_modified
                ON conversations(last_modified);
            CREATE INDEX IF NOT EXISTS idx_artifacts_reference
                ON artifacts(reference);
            CREATE INDEX IF NOT EXISTS idx_sync_queue_timestamp
                ON sync_queue(timestamp);
            CREATE INDEX IF NOT EXISTS idx_sync_queue_type
                ON sync_queue(op_type);
            ",
            )
            .map_err(AppError::database)?;

        Ok(())
    }

    // ---------------------------------------------------------------------
    // conversations
    // ---------------------------------------------------------------------

    /// Insert or replace a conversation.
    pub fn put_conversation(&self, conv: &Conversation) -> Result<()> {
        let data = serde_json::to_string(conv).map_err(AppError::json_parse)?;
        self.conn()?
            .execute(
                r"
            INSERT INTO conversations (id, title, last_modified, data)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                last_modified = excluded.last_modified,
                data = excluded.data
            ",
                params![
                    &conv.id,
                    &conv.title,
                    conv.last_modified.timestamp_millis(),
                    data
                ],
            )
            .map_err(AppError::database)?;

        tracing::debug!(conversation_id = %conv.id, "Cached conversation");
        Ok(())
    }

    /// Get a conversation by id.
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let data: Option<String> = self
            .conn()?
            .query_row(
                "SELECT data FROM conversations WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::database)?;

        data.map(|json| parse_conversation(id, &json)).transpose()
    }

    /// All conversations keyed by id. Unordered; sort by `last_modified` when
    /// order matters.
    pub fn all_conversations(&self) -> Result<HashMap<String, Conversation>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, data FROM conversations")
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(AppError::database)?;

        let mut conversations = HashMap::new();
        for row in rows {
            let (id, json) = row.map_err(AppError::database)?;
            match parse_conversation(&id, &json) {
                Ok(conv) => {
                    conversations.insert(id, conv);
                }
                Err(e) => tracing::warn!(conversation_id = %id, error = %e, "Skipping unreadable cached conversation"),
            }
        }

        Ok(conversations)
    }

    /// Delete a conversation. Returns whether a row was removed.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM conversations WHERE id = ?1", [id])
            .map_err(AppError::database)?;
        Ok(removed > 0)
    }

    /// Get conversation count.
    pub fn conversation_count(&self) -> Result<usize> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| usize::try_from(c).unwrap_or_default())
            .map_err(AppError::database)
    }

    // ---------------------------------------------------------------------
    // artifacts
    // ---------------------------------------------------------------------

    /// Insert or replace cached artifact bytes.
    pub fn put_artifact(&self, record: &ArtifactRecord) -> Result<()> {
        self.conn()?
            .execute(
                r"
            INSERT INTO artifacts (name, mime_type, data, reference, temporary, cached_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(name) DO UPDATE SET
                mime_type = excluded.mime_type,
                data = excluded.data,
                reference = excluded.reference,
                temporary = excluded.temporary,
                cached_at = excluded.cached_at
            ",
                params![
                    &record.name,
                    &record.mime_type,
                    &record.data,
                    record.reference.as_ref().map(ToString::to_string),
                    i32::from(record.temporary),
                    record.cached_at.to_rfc3339(),
                ],
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Get cached artifact by name.
    pub fn get_artifact(&self, name: &str) -> Result<Option<ArtifactRecord>> {
        self.query_artifact("WHERE name = ?1", name)
    }

    /// Get cached artifact by its remote reference.
    pub fn find_artifact_by_reference(
        &self,
        reference: &ArtifactReference,
    ) -> Result<Option<ArtifactRecord>> {
        self.query_artifact("WHERE reference = ?1", &reference.to_string())
    }

    fn query_artifact(&self, clause: &str, key: &str) -> Result<Option<ArtifactRecord>> {
        let sql = format!(
            "SELECT name, mime_type, data, reference, temporary, cached_at FROM artifacts {clause}"
        );
        self.conn()?
            .query_row(&sql, [key], row_to_artifact)
            .optional()
            .map_err(AppError::database)
    }

    /// Artifacts whose upload has not succeeded yet, oldest first.
    pub fn temporary_artifacts(&self) -> Result<Vec<ArtifactRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, mime_type, data, reference, temporary, cached_at FROM artifacts
                 WHERE temporary = 1 ORDER BY cached_at ASC",
            )
            .map_err(AppError::database)?;
        let rows = stmt
            .query_map([], row_to_artifact)
            .map_err(AppError::database)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::database)
    }

    // ---------------------------------------------------------------------
    // sync queue
    // ---------------------------------------------------------------------

    /// Insert a queue entry unless one with the same operation and target
    /// already exists. Returns whether a row was inserted.
    ///
    /// A duplicate bumps the existing row's revision, so a drain that read
    /// the older revision leaves the row queued.
    pub fn enqueue_unique(&self, operation: SyncOperation, target_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(AppError::database)?;

        let exists = {
            let mut stmt = tx
                .prepare("SELECT target_id FROM sync_queue WHERE op_type = ?1")
                .map_err(AppError::database)?;
            let targets = stmt
                .query_map([operation.as_str()], |row| row.get::<_, String>(0))
                .map_err(AppError::database)?;

            let mut found = false;
            for target in targets {
                if target.map_err(AppError::database)? == target_id {
                    found = true;
                    break;
                }
            }
            found
        };

        if exists {
            tx.execute(
                "UPDATE sync_queue SET revision = revision + 1 WHERE op_type = ?1 AND target_id = ?2",
                params![operation.as_str(), target_id],
            )
            .map_err(AppError::database)?;
        } else {
            tx.execute(
                "INSERT INTO sync_queue (op_type, target_id, timestamp) VALUES (?1, ?2, ?3)",
                params![operation.as_str(), target_id, Utc::now().timestamp_millis()],
            )
            .map_err(AppError::database)?;
        }

        tx.commit().map_err(AppError::database)?;
        Ok(!exists)
    }

    /// All queue entries, oldest first.
    pub fn queue_entries(&self) -> Result<Vec<SyncQueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, op_type, target_id, timestamp, revision FROM sync_queue ORDER BY id ASC",
            )
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(AppError::database)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, op_type, target_id, timestamp, revision) =
                row.map_err(AppError::database)?;
            match op_type.parse::<SyncOperation>() {
                Ok(operation) => entries.push(SyncQueueEntry {
                    id,
                    operation,
                    target_id,
                    enqueued_at: DateTime::from_timestamp_millis(timestamp)
                        .unwrap_or_else(Utc::now),
                    revision,
                }),
                Err(e) => tracing::warn!(entry_id = id, error = %e, "Ignoring unknown queue entry"),
            }
        }

        Ok(entries)
    }

    /// Whether an entry for this operation and target is pending.
    pub fn has_queue_entry(&self, operation: SyncOperation, target_id: &str) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT 1 FROM sync_queue WHERE op_type = ?1 AND target_id = ?2 LIMIT 1",
                params![operation.as_str(), target_id],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(AppError::database)
    }

    /// Remove a queue entry if it was not re-queued since it was read.
    /// Returns whether the row was removed.
    pub fn complete_queue_entry(&self, entry: &SyncQueueEntry) -> Result<bool> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM sync_queue WHERE id = ?1 AND revision = ?2",
                params![entry.id, entry.revision],
            )
            .map_err(AppError::database)?;
        Ok(removed > 0)
    }

    /// Remove pending entries for this operation and target.
    pub fn remove_queue_entries_for(
        &self,
        operation: SyncOperation,
        target_id: &str,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "DELETE FROM sync_queue WHERE op_type = ?1 AND target_id = ?2",
                params![operation.as_str(), target_id],
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Number of pending queue entries.
    pub fn queue_len(&self) -> Result<usize> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| usize::try_from(c).unwrap_or_default())
            .map_err(AppError::database)
    }

    // ---------------------------------------------------------------------
    // metadata
    // ---------------------------------------------------------------------

    /// Set a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Get a metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(AppError::database)
    }

    /// Remove metadata values in one transaction.
    pub fn delete_meta(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(AppError::database)?;
        for key in keys {
            tx.execute("DELETE FROM metadata WHERE key = ?1", [key])
                .map_err(AppError::database)?;
        }
        tx.commit().map_err(AppError::database)
    }

    /// Set several metadata values in one transaction.
    pub fn set_meta_many(&self, pairs: &[(&str, String)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(AppError::database)?;
        for (key, value) in pairs {
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(AppError::database)?;
        }
        tx.commit().map_err(AppError::database)
    }
}

fn parse_conversation(id: &str, json: &str) -> Result<Conversation> {
    serde_json::from_str(json).map_err(|e| AppError::CorruptRecord {
        id: id.to_string(),
        message: e.to_string(),
    })
}

fn row_to_artifact(row: &rusqlite::Row) -> rusqlite::Result<ArtifactRecord> {
    let reference: Option<String> = row.get(3)?;
    let cached_at: String = row.get(5)?;

    Ok(ArtifactRecord {
        name: row.get(0)?,
        mime_type: row.get(1)?,
        data: row.get(2)?,
        reference: reference.and_then(|r| r.parse().ok()),
        temporary: row.get::<_, i32>(4)? != 0,
        cached_at: DateTime::parse_from_rfc3339(&cached_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
