//! Conversation persistence
//!
//! One row per conversation; the message list is stored as JSON. The schema is
//! versioned through `PRAGMA user_version` and upgraded once when the database
//! is opened.

mod schema;

pub use schema::SCHEMA_VERSION;
use schema::{
    format_datetime, parse_datetime, upgrade_legacy_messages, MIGRATION_ADD_ENABLE_SEARCH, SCHEMA,
};

use crate::conversation::{ConversationRecord, Message};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Stored conversation is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Durable home for conversation records
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert or replace the record with the same id
    async fn save(&self, record: &ConversationRecord) -> DbResult<()>;

    async fn get(&self, id: &str) -> DbResult<Option<ConversationRecord>>;

    /// All records, most recently updated first
    async fn get_all(&self) -> DbResult<Vec<ConversationRecord>>;

    /// Remove a record; deleting an unknown id is not an error
    async fn delete(&self, id: &str) -> DbResult<()>;

    /// Update only the title, leaving messages untouched
    async fn rename(&self, id: &str, title: &str) -> DbResult<()>;
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> DbResult<Self> {
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    pub fn save_conversation(&self, record: &ConversationRecord) -> DbResult<()> {
        let messages = serde_json::to_string(&record.messages)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO conversations (id, title, messages, model, system_prompt, enable_search, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                messages = excluded.messages,
                model = excluded.model,
                system_prompt = excluded.system_prompt,
                enable_search = excluded.enable_search,
                updated_at = excluded.updated_at",
            params![
                record.id,
                record.title,
                messages,
                record.model,
                record.system_prompt,
                record.enable_search,
                format_datetime(record.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, id: &str) -> DbResult<Option<ConversationRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, title, messages, model, system_prompt, enable_search, updated_at
                 FROM conversations WHERE id = ?1",
                params![id],
                RawRow::from_row,
            )
            .optional()?;
        drop(conn);

        row.map(RawRow::into_record).transpose()
    }

    pub fn list_conversations(&self) -> DbResult<Vec<ConversationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, messages, model, system_prompt, enable_search, updated_at
             FROM conversations ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(RawRow::into_record).collect()
    }

    pub fn delete_conversation(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1",
            params![id, title],
        )?;
        if updated == 0 {
            tracing::debug!(conv_id = %id, "Rename skipped, conversation not stored");
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for Database {
    async fn save(&self, record: &ConversationRecord) -> DbResult<()> {
        self.save_conversation(record)
    }

    async fn get(&self, id: &str) -> DbResult<Option<ConversationRecord>> {
        self.get_conversation(id)
    }

    async fn get_all(&self) -> DbResult<Vec<ConversationRecord>> {
        self.list_conversations()
    }

    async fn delete(&self, id: &str) -> DbResult<()> {
        self.delete_conversation(id)
    }

    async fn rename(&self, id: &str, title: &str) -> DbResult<()> {
        self.rename_conversation(id, title)
    }
}

/// Row as stored, before the message JSON is decoded
struct RawRow {
    id: String,
    title: String,
    messages: String,
    model: String,
    system_prompt: String,
    enable_search: bool,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            messages: row.get(2)?,
            model: row.get(3)?,
            system_prompt: row.get(4)?,
            enable_search: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_record(self) -> DbResult<ConversationRecord> {
        let messages: Vec<Message> = serde_json::from_str(&self.messages)?;
        Ok(ConversationRecord {
            id: self.id,
            title: self.title,
            messages,
            model: self.model,
            system_prompt: self.system_prompt,
            enable_search: self.enable_search,
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

fn run_migrations(conn: &mut Connection) -> DbResult<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    tracing::info!(from = version, to = SCHEMA_VERSION, "Migrating database schema");
    let tx = conn.transaction()?;
    if version < 1 {
        tx.execute_batch(SCHEMA)?;
    } else {
        tx.execute(MIGRATION_ADD_ENABLE_SEARCH, [])?;
        upgrade_legacy_rows(&tx)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn upgrade_legacy_rows(conn: &Connection) -> DbResult<()> {
    let rows: Vec<(String, String, String)> = {
        let mut stmt = conn.prepare("SELECT id, messages, updated_at FROM conversations")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (id, messages, updated_at) in rows {
        let mut value: serde_json::Value = match serde_json::from_str(&messages) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(conv_id = %id, error = %e, "Leaving unreadable conversation as is");
                continue;
            }
        };
        let dropped = upgrade_legacy_messages(&mut value, parse_datetime(&updated_at));
        if dropped > 0 {
            tracing::warn!(conv_id = %id, dropped, "Dropped legacy content items");
        }
        conn.execute(
            "UPDATE conversations SET messages = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(&value)?],
        )?;
    }
    Ok(())
}
