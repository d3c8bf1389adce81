pub mod memory;
pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

use crate::classify::Mark;
use crate::destination::Service;
use crate::track::TrackIdentity;

pub use memory::MemoryLedger;
pub use models::{LedgerEntry, LedgerStats, PassSummary};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Ledger write failed: {0}")]
    Write(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Durable record of the classifications this relay placed on each destination.
///
/// Keyed by `(source_id, destination)`. Every mutation must be durable by the
/// time it returns `Ok`, because the engine treats the ledger as the only
/// evidence that a remote action happened.
pub trait LedgerStore {
    fn destination_entries(&self, destination: Service) -> Result<Vec<LedgerEntry>>;

    fn get(&self, source_id: &str, destination: Service) -> Result<Option<LedgerEntry>>;

    /// Upsert. Recording an identical (track, destination, mark, remote_id)
    /// is a no-op. `remote_id` is the destination's own key for the track,
    /// kept so a later retraction targets exactly what was added.
    fn record(
        &mut self,
        track: &TrackIdentity,
        destination: Service,
        mark: Mark,
        remote_id: Option<&str>,
    ) -> Result<()>;

    /// Remove the entry if present.
    fn erase(&mut self, source_id: &str, destination: Service) -> Result<()>;

    fn record_pass(&mut self, summary: &PassSummary) -> Result<()>;

    fn last_pass(&self, destination: Service) -> Result<Option<PassSummary>>;
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    pub conn: Connection,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let ledger = Self { conn };
        ledger.init()?;
        Ok(ledger)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.init()?;
        Ok(ledger)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        // FULL: a committed entry must survive power loss, not just a crash
        self.conn.pragma_update(None, "synchronous", "FULL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(LedgerError::Migration(format!(
                "ledger schema v{version} is newer than this build (v{SCHEMA_VERSION})"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }
        if version < 2 {
            self.migrate_v2()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: ledger entries + pass history
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS ledger_entries (
                source_id       TEXT NOT NULL,
                destination     TEXT NOT NULL,
                mark            TEXT NOT NULL CHECK (mark IN ('loved', 'hated')),

                -- Identity as observed when the entry was recorded; needed to
                -- retract tracks that have since left the source library
                artist          TEXT NOT NULL,
                title           TEXT NOT NULL,
                album           TEXT,
                mbid            TEXT,

                added_at        TEXT NOT NULL,
                PRIMARY KEY (source_id, destination)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_destination ON ledger_entries(destination);

            CREATE TABLE IF NOT EXISTS passes (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                destination           TEXT NOT NULL,
                started_at            TEXT NOT NULL,
                finished_at           TEXT NOT NULL,
                added                 INTEGER NOT NULL,
                removed               INTEGER NOT NULL,
                replaced              INTEGER NOT NULL,
                not_found             INTEGER NOT NULL,
                failed                INTEGER NOT NULL,
                persistence_failures  INTEGER NOT NULL,
                aborted               TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_passes_destination ON passes(destination, id);
            ",
        )?;
        Ok(())
    }

    /// V2: destination-side key (ListenBrainz recording MBID) per entry
    fn migrate_v2(&self) -> Result<()> {
        self.conn
            .execute_batch("ALTER TABLE ledger_entries ADD COLUMN remote_id TEXT;")?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 2;
