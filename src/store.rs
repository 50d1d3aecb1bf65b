//! Keyed note store.
//!
//! Notes are keyed by `(pr_id, kind)` and written through as they are
//! extracted or edited; reads are served straight from the store. This
//! replaces the original ambient per-key browser storage with an explicit
//! store whose lifecycle the server owns.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::demux::SectionKind;

/// Which note a stored row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Developer,
    Marketing,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::Marketing => "marketing",
        }
    }
}

impl FromStr for NoteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "developer" => Ok(Self::Developer),
            "marketing" => Ok(Self::Marketing),
            _ => Err(format!("Invalid note kind: {}", s)),
        }
    }
}

impl From<SectionKind> for NoteKind {
    fn from(kind: SectionKind) -> Self {
        match kind {
            SectionKind::Developer => Self::Developer,
            SectionKind::Marketing => Self::Marketing,
        }
    }
}

/// Both stored notes for one PR. A note never generated or saved is `None`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NoteRecord {
    pub pr_id: String,
    pub developer: Option<String>,
    pub marketing: Option<String>,
    pub updated_at: Option<String>,
}

impl NoteRecord {
    fn empty(pr_id: &str) -> Self {
        Self {
            pr_id: pr_id.to_string(),
            developer: None,
            marketing: None,
            updated_at: None,
        }
    }
}

pub struct NoteStore {
    conn: Connection,
}

impl NoteStore {
    /// Open (or create) the store at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open notes database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// In-memory store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory notes database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS notes (
                    pr_id TEXT NOT NULL,
                    kind TEXT NOT NULL CHECK (kind IN ('developer', 'marketing')),
                    body TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (pr_id, kind)
                );
                ",
            )
            .context("Failed to create notes table")?;
        Ok(())
    }

    /// Write-through upsert of one note.
    pub fn put(&self, pr_id: &str, kind: NoteKind, body: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO notes (pr_id, kind, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (pr_id, kind)
                 DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![pr_id, kind.as_str(), body, now],
            )
            .context("Failed to upsert note")?;
        Ok(())
    }

    /// Read both notes for a PR. Missing notes come back as `None`; the
    /// record's `updated_at` is the most recent write across both kinds.
    pub fn get(&self, pr_id: &str) -> Result<NoteRecord> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, body, updated_at FROM notes WHERE pr_id = ?1")
            .context("Failed to prepare notes query")?;
        let rows = stmt
            .query_map(params![pr_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Failed to query notes")?;

        let mut record = NoteRecord::empty(pr_id);
        for row in rows {
            let (kind, body, updated_at) = row.context("Failed to read note row")?;
            match NoteKind::from_str(&kind) {
                Ok(NoteKind::Developer) => record.developer = Some(body),
                Ok(NoteKind::Marketing) => record.marketing = Some(body),
                Err(_) => continue,
            }
            if record.updated_at.as_deref().is_none_or(|t| t < updated_at.as_str()) {
                record.updated_at = Some(updated_at);
            }
        }
        Ok(record)
    }
}

/// Async-safe handle to the note store.
///
/// Runs all access on tokio's blocking thread pool via `spawn_blocking`,
/// keeping synchronous SQLite I/O off async worker threads.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<NoteStore>>,
}

impl StoreHandle {
    pub fn new(store: NoteStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&NoteStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }
}
