//! Captured-title filter backed by SQLite
//!
//! Keyed by (title, year). Inserts made during a run stay in one open
//! transaction and become durable on `close`.

use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Filter database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Cannot create filter database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Filter is closed")]
    Closed,
}

/// Existence check plus insert against captured titles.
pub trait TitleFilter: Send {
    fn exists(&self, title: &str, year: u32) -> Result<bool, FilterError>;

    fn record(&mut self, title: &str, year: u32, account_label: &str, account_id: &str) -> Result<(), FilterError>;

    /// Flush and release. Further calls fail with [`FilterError::Closed`].
    fn close(&mut self) -> Result<(), FilterError>;
}

pub struct SqliteTitleFilter {
    conn: Option<Connection>,
}

fn apply_schema(conn: &Connection) -> Result<(), FilterError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS movies (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            year INTEGER NOT NULL,
            account_type TEXT NULL,
            account_id TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_movies_name_year ON movies(name, year);",
    )?;
    Ok(())
}

impl SqliteTitleFilter {
    pub fn open(path: &Path) -> Result<Self, FilterError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened title filter at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, FilterError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, FilterError> {
        apply_schema(&conn)?;
        conn.execute_batch("BEGIN")?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&self) -> Result<&Connection, FilterError> {
        self.conn.as_ref().ok_or(FilterError::Closed)
    }
}

impl TitleFilter for SqliteTitleFilter {
    fn exists(&self, title: &str, year: u32) -> Result<bool, FilterError> {
        let found: bool = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM movies WHERE name = ?1 AND year = ?2)",
            params![title, year],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    fn record(&mut self, title: &str, year: u32, account_label: &str, account_id: &str) -> Result<(), FilterError> {
        self.conn()?.execute(
            "INSERT INTO movies (name, year, account_type, account_id) VALUES (?1, ?2, ?3, ?4)",
            params![title, year, account_label, account_id],
        )?;
        debug!("Recorded {} ({}) on {}:{}", title, year, account_label, account_id);
        Ok(())
    }

    fn close(&mut self) -> Result<(), FilterError> {
        let conn = self.conn.take().ok_or(FilterError::Closed)?;
        conn.execute_batch("COMMIT")?;
        conn.close().map_err(|(_, e)| FilterError::Sqlite(e))?;
        Ok(())
    }
}

impl Drop for SqliteTitleFilter {
    fn drop(&mut self) {
        if self.conn.is_some() {
            if let Err(e) = self.close() {
                warn!("Title filter not closed cleanly: {}", e);
            }
        }
    }
}
