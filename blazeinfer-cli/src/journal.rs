//! Generation journal using SQLite.
//!
//! Each completed run is stored with its prompt, completion, token count,
//! stop reason and wall time, so the interactive front end can show what
//! was generated earlier.

use std::path::Path;

use blazeinfer::Generation;
use rusqlite::{params, Connection, Result, Row};

/// One recorded generation.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub id: i64,
    pub timestamp: String,
    pub prompt: String,
    pub completion: String,
    pub generated_tokens: i64,
    pub stop_reason: String,
    pub elapsed_ms: i64,
}

impl JournalEntry {
    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            prompt: row.get(2)?,
            completion: row.get(3)?,
            generated_tokens: row.get(4)?,
            stop_reason: row.get(5)?,
            elapsed_ms: row.get(6)?,
        })
    }
}

/// Totals across the journal.
#[derive(Debug)]
pub struct JournalStats {
    pub total_runs: i64,
    pub total_tokens: i64,
    pub db_size_bytes: u64,
}

pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open the journal, creating the table if needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS generations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                prompt TEXT NOT NULL,
                completion TEXT NOT NULL,
                generated_tokens INTEGER NOT NULL,
                stop_reason TEXT NOT NULL,
                elapsed_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Store a completed run.
    pub fn record(&self, prompt: &str, generation: &Generation) -> Result<i64> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let generated_tokens = generation.tokens.len() as i64;
        let elapsed_ms = generation.elapsed.as_millis() as i64;
        self.conn.execute(
            "INSERT INTO generations
                (timestamp, prompt, completion, generated_tokens, stop_reason, elapsed_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                timestamp,
                prompt,
                generation.text,
                generated_tokens,
                generation.stop_reason.as_str(),
                elapsed_ms,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The most recent `limit` runs, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, prompt, completion, generated_tokens, stop_reason, elapsed_ms
             FROM generations
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let mut entries = stmt
            .query_map([limit as i64], JournalEntry::from_row)?
            .collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    pub fn count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM generations", [], |row| row.get(0))
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM generations", [])?;
        Ok(())
    }

    pub fn stats(&self) -> Result<JournalStats> {
        let (total_runs, total_tokens) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(generated_tokens), 0) FROM generations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let db_size_bytes = self
            .conn
            .path()
            .filter(|p| !p.is_empty())
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());
        Ok(JournalStats {
            total_runs,
            total_tokens,
            db_size_bytes,
        })
    }
}
