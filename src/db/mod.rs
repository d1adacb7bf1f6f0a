//! Embedded SQL database owned by the desktop host process.
//!
//! One connection serializes every statement. `notes.notebook_id` cascades on
//! delete, but notebook deletion still runs both deletes inside an explicit
//! transaction so databases that predate the constraint stay consistent.

mod images;
mod schema;

pub use images::ImageDir;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::*;

/// File name of the database inside the per-user data directory.
pub const DB_FILE_NAME: &str = "notes.db";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    /// Location of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ============================================================
    // Notebook operations
    // ============================================================

    pub fn get_all_notebooks(&self) -> Result<Vec<Notebook>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at
             FROM notebooks ORDER BY updated_at DESC, id DESC",
        )?;

        let notebooks = stmt
            .query_map([], notebook_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(notebooks)
    }

    pub fn get_notebook(&self, id: Uuid) -> Result<Option<Notebook>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at
             FROM notebooks WHERE id = ?",
        )?;

        Ok(stmt
            .query_row([id.to_string()], notebook_from_row)
            .optional()?)
    }

    pub fn create_notebook(&self, name: &str) -> Result<Notebook> {
        validate_notebook_name(name)?;

        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = now();

        conn.execute(
            "INSERT INTO notebooks (id, name, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
            (
                id.to_string(),
                name,
                format_timestamp(now),
                format_timestamp(now),
            ),
        )?;

        Ok(Notebook {
            id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Partial update; omitted fields keep their stored value. Returns whether a row matched.
    pub fn update_notebook(&self, id: Uuid, input: UpdateNotebookInput) -> Result<bool> {
        if let Some(name) = &input.name {
            validate_notebook_name(name)?;
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let Some(previous) = notebook_stamp(&conn, id)? else {
            return Ok(false);
        };
        let updated_at = next_timestamp(previous);

        let rows = conn.execute(
            "UPDATE notebooks SET name = COALESCE(?, name), updated_at = ? WHERE id = ?",
            (&input.name, format_timestamp(updated_at), id.to_string()),
        )?;
        Ok(rows > 0)
    }

    /// Delete a notebook and all of its notes atomically.
    pub fn delete_notebook(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let outcome: rusqlite::Result<usize> = (|| {
            tx.execute("DELETE FROM notes WHERE notebook_id = ?", [id.to_string()])?;
            tx.execute("DELETE FROM notebooks WHERE id = ?", [id.to_string()])
        })();

        match outcome {
            Ok(rows) => {
                tx.commit()?;
                Ok(rows > 0)
            }
            Err(e) => {
                tracing::warn!("Rolling back delete of notebook {}: {}", id, e);
                tx.rollback()?;
                Err(StoreError::Transaction(e.to_string()).into())
            }
        }
    }

    // ============================================================
    // Note operations
    // ============================================================

    pub fn get_notes_by_notebook(&self, notebook_id: Uuid) -> Result<Vec<Note>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, notebook_id, title, content, created_at, updated_at
             FROM notes WHERE notebook_id = ? ORDER BY updated_at DESC, id DESC",
        )?;

        let notes = stmt
            .query_map([notebook_id.to_string()], note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(notes)
    }

    pub fn get_note(&self, id: Uuid) -> Result<Option<Note>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, notebook_id, title, content, created_at, updated_at
             FROM notes WHERE id = ?",
        )?;

        Ok(stmt.query_row([id.to_string()], note_from_row).optional()?)
    }

    pub fn create_note(&self, input: CreateNoteInput) -> Result<Note> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = now();
        let content = input.content.unwrap_or_default();

        conn.execute(
            "INSERT INTO notes (id, notebook_id, title, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                input.notebook_id.to_string(),
                &input.title,
                &content,
                format_timestamp(now),
                format_timestamp(now),
            ),
        )?;

        Ok(Note {
            id,
            notebook_id: input.notebook_id,
            title: input.title,
            content,
            created_at: now,
            updated_at: now,
        })
    }

    /// Partial update; omitted fields keep their stored value. Returns whether a row matched.
    pub fn update_note(&self, id: Uuid, input: UpdateNoteInput) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let Some(previous) = note_stamp(&conn, id)? else {
            return Ok(false);
        };
        let updated_at = next_timestamp(previous);

        let rows = conn.execute(
            "UPDATE notes
             SET title = COALESCE(?, title), content = COALESCE(?, content), updated_at = ?
             WHERE id = ?",
            (
                &input.title,
                &input.content,
                format_timestamp(updated_at),
                id.to_string(),
            ),
        )?;
        Ok(rows > 0)
    }

    pub fn delete_note(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM notes WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    /// Case-insensitive substring search over title and raw content.
    pub fn search_notes(&self, query: &str) -> Result<Vec<Note>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
        let mut stmt = conn.prepare(
            "SELECT id, notebook_id, title, content, created_at, updated_at
             FROM notes
             WHERE LOWER(title) LIKE ?1 ESCAPE '\\' OR LOWER(content) LIKE ?1 ESCAPE '\\'
             ORDER BY updated_at DESC, id DESC",
        )?;

        let notes = stmt
            .query_map([pattern], note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(notes)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
        }
    }
}

/// `<data_dir>/notes.db` for the current user.
pub fn default_path() -> Result<PathBuf> {
    Ok(crate::config::default_data_dir()?.join(DB_FILE_NAME))
}

fn notebook_stamp(conn: &Connection, id: Uuid) -> Result<Option<chrono::DateTime<Utc>>> {
    let stamp: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM notebooks WHERE id = ?",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stamp.map(parse_datetime))
}

fn note_stamp(conn: &Connection, id: Uuid) -> Result<Option<chrono::DateTime<Utc>>> {
    let stamp: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM notes WHERE id = ?",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stamp.map(parse_datetime))
}

fn notebook_from_row(row: &Row<'_>) -> rusqlite::Result<Notebook> {
    Ok(Notebook {
        id: parse_uuid(row.get::<_, String>(0)?),
        name: row.get(1)?,
        created_at: parse_datetime(row.get::<_, String>(2)?),
        updated_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: parse_uuid(row.get::<_, String>(0)?),
        notebook_id: parse_uuid(row.get::<_, String>(1)?),
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        updated_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    parse_timestamp(&s).unwrap_or_else(Utc::now)
}
