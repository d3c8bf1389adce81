use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::classify::Mark;
use crate::destination::Service;
use crate::track::TrackIdentity;

/// A classification the relay placed on a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub track: TrackIdentity,
    pub destination: Service,
    pub mark: Mark,
    pub added_at: DateTime<Utc>,
    /// Destination-side key the mark was placed on, when the destination has one.
    pub remote_id: Option<String>,
}

/// Outcome counters for one destination's reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub destination: Service,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub added: usize,
    pub removed: usize,
    /// Stale entries flipped from one mark to the other.
    pub replaced: usize,
    pub not_found: usize,
    pub failed: usize,
    /// Remote action succeeded but the ledger write did not.
    pub persistence_failures: usize,
    /// Set when the pass stopped early (authentication failure).
    pub aborted: Option<String>,
}

impl PassSummary {
    pub fn new(destination: Service) -> Self {
        let now = Utc::now();
        Self {
            destination,
            started_at: now,
            finished_at: now,
            added: 0,
            removed: 0,
            replaced: 0,
            not_found: 0,
            failed: 0,
            persistence_failures: 0,
            aborted: None,
        }
    }

    pub fn actions(&self) -> usize {
        self.added + self.removed + self.replaced
    }

    /// Completed without abort, skip or failure.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none()
            && self.not_found == 0
            && self.failed == 0
            && self.persistence_failures == 0
    }
}

/// Ledger size per destination, for `status`.
pub struct LedgerStats {
    pub total_entries: i64,
    /// (destination, mark, count)
    pub by_destination: Vec<(String, String, i64)>,
    pub total_passes: i64,
}

impl ToSql for Mark {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Mark {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Mark::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown mark '{s}'").into()))
    }
}

impl ToSql for Service {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Service {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Service::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown destination '{s}'").into()))
    }
}
