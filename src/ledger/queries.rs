use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use super::models::{LedgerEntry, LedgerStats, PassSummary};
use super::{LedgerStore, Result, SqliteLedger};
use crate::classify::Mark;
use crate::destination::Service;
use crate::track::TrackIdentity;

const ENTRY_COLUMNS: &str =
    "source_id, destination, mark, artist, title, album, mbid, added_at, remote_id";

const PASS_COLUMNS: &str = "destination, started_at, finished_at, added, removed, replaced,
     not_found, failed, persistence_failures, aborted";

impl LedgerStore for SqliteLedger {
    fn destination_entries(&self, destination: Service) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE destination = ?1
             ORDER BY source_id"
        ))?;

        let entries = stmt
            .query_map(params![destination], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn get(&self, source_id: &str, destination: Service) -> Result<Option<LedgerEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                     WHERE source_id = ?1 AND destination = ?2"
                ),
                params![source_id, destination],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn record(
        &mut self,
        track: &TrackIdentity,
        destination: Service,
        mark: Mark,
        remote_id: Option<&str>,
    ) -> Result<()> {
        // The WHERE clause keeps an identical re-record from touching the row
        self.conn.execute(
            "INSERT INTO ledger_entries (
                source_id, destination, mark, artist, title, album, mbid, added_at, remote_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(source_id, destination) DO UPDATE SET
                mark = excluded.mark,
                artist = excluded.artist,
                title = excluded.title,
                album = excluded.album,
                mbid = excluded.mbid,
                added_at = excluded.added_at,
                remote_id = excluded.remote_id
            WHERE ledger_entries.mark <> excluded.mark
               OR ledger_entries.remote_id IS NOT excluded.remote_id",
            params![
                track.source_id,
                destination,
                mark,
                track.artist,
                track.title,
                track.album,
                track.mbid,
                Utc::now().to_rfc3339(),
                remote_id,
            ],
        )?;
        Ok(())
    }

    fn erase(&mut self, source_id: &str, destination: Service) -> Result<()> {
        self.conn.execute(
            "DELETE FROM ledger_entries WHERE source_id = ?1 AND destination = ?2",
            params![source_id, destination],
        )?;
        Ok(())
    }

    fn record_pass(&mut self, s: &PassSummary) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO passes ({PASS_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                s.destination,
                s.started_at.to_rfc3339(),
                s.finished_at.to_rfc3339(),
                s.added as i64,
                s.removed as i64,
                s.replaced as i64,
                s.not_found as i64,
                s.failed as i64,
                s.persistence_failures as i64,
                s.aborted,
            ],
        )?;
        Ok(())
    }

    fn last_pass(&self, destination: Service) -> Result<Option<PassSummary>> {
        let pass = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PASS_COLUMNS} FROM passes
                     WHERE destination = ?1
                     ORDER BY id DESC LIMIT 1"
                ),
                params![destination],
                pass_from_row,
            )
            .optional()?;
        Ok(pass)
    }
}

impl SqliteLedger {
    /// Every entry across all destinations, for `ratingrelay ledger`.
    pub fn all_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             ORDER BY destination, artist, title"
        ))?;

        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let total_entries: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_entries",
            [],
            |row| row.get(0),
        )?;

        let total_passes: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM passes",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT destination, mark, COUNT(*) FROM ledger_entries
             GROUP BY destination, mark ORDER BY destination, mark",
        )?;
        let by_destination: Vec<(String, String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LedgerStats {
            total_entries,
            by_destination,
            total_passes,
        })
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        track: TrackIdentity {
            source_id: row.get(0)?,
            artist: row.get(3)?,
            title: row.get(4)?,
            album: row.get(5)?,
            mbid: row.get(6)?,
        },
        destination: row.get(1)?,
        mark: row.get(2)?,
        added_at: timestamp(row, 7)?,
        remote_id: row.get(8)?,
    })
}

fn pass_from_row(row: &Row<'_>) -> rusqlite::Result<PassSummary> {
    let count = |idx: usize| -> rusqlite::Result<usize> { Ok(row.get::<_, i64>(idx)?.max(0) as usize) };
    Ok(PassSummary {
        destination: row.get(0)?,
        started_at: timestamp(row, 1)?,
        finished_at: timestamp(row, 2)?,
        added: count(3)?,
        removed: count(4)?,
        replaced: count(5)?,
        not_found: count(6)?,
        failed: count(7)?,
        persistence_failures: count(8)?,
        aborted: row.get(9)?,
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_track(source_id: &str) -> TrackIdentity {
        TrackIdentity {
            source_id: source_id.to_string(),
            artist: "Grateful Dead".to_string(),
            title: "Scarlet Begonias".to_string(),
            album: Some("Cornell 5/8/77".to_string()),
            mbid: Some("6f0c6f4e-3e0d-4b67-9e4c-1f5c2d0a9b11".to_string()),
        }
    }

    #[test]
    fn test_record_and_get() {
        let mut db = SqliteLedger::open_in_memory().unwrap();
        let t = test_track("101");
        db.record(&t, Service::LastFm, Mark::Loved, None).unwrap();

        let entry = db.get("101", Service::LastFm).unwrap().unwrap();
        assert_eq!(entry.track, t);
        assert_eq!(entry.mark, Mark::Loved);
        assert_eq!(entry.destination, Service::LastFm);

        assert!(db.get("101", Service::ListenBrainz).unwrap().is_none());
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut db = SqliteLedger::open_in_memory().unwrap();
        let t = test_track("101");
        db.record(&t, Service::LastFm, Mark::Loved, None).unwrap();
        let first = db.get("101", Service::LastFm).unwrap().unwrap();

        db.record(&t, Service::LastFm, Mark::Loved, None).unwrap();
        let second = db.get("101", Service::LastFm).unwrap().unwrap();

        assert_eq!(first.added_at, second.added_at);
        assert_eq!(db.stats().unwrap().total_entries, 1);
    }

    #[test]
    fn test_record_replaces_mark() {
        let mut db = SqliteLedger::open_in_memory().unwrap();
        let t = test_track("101");
        db.record(&t, Service::ListenBrainz, Mark::Hated, None).unwrap();
        db.record(&t, Service::ListenBrainz, Mark::Loved, None).unwrap();

        let entries = db.destination_entries(Service::ListenBrainz).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mark, Mark::Loved);
    }

    #[test]
    fn test_entries_are_per_destination() {
        let mut db = SqliteLedger::open_in_memory().unwrap();
        db.record(&test_track("1"), Service::LastFm, Mark::Loved, None).unwrap();
        db.record(&test_track("2"), Service::LastFm, Mark::Loved, None).unwrap();
        db.record(&test_track("1"), Service::ListenBrainz, Mark::Loved, None).unwrap();

        assert_eq!(db.destination_entries(Service::LastFm).unwrap().len(), 2);
        assert_eq!(db.destination_entries(Service::ListenBrainz).unwrap().len(), 1);
        assert_eq!(db.all_entries().unwrap().len(), 3);

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_destination.len(), 2);
    }

    #[test]
    fn test_erase_is_idempotent() {
        let mut db = SqliteLedger::open_in_memory().unwrap();
        db.record(&test_track("1"), Service::LastFm, Mark::Loved, None).unwrap();
        db.erase("1", Service::LastFm).unwrap();
        db.erase("1", Service::LastFm).unwrap();
        assert!(db.get("1", Service::LastFm).unwrap().is_none());
    }

    #[test]
    fn test_pass_history() {
        let mut db = SqliteLedger::open_in_memory().unwrap();
        assert!(db.last_pass(Service::LastFm).unwrap().is_none());

        let mut first = PassSummary::new(Service::LastFm);
        first.added = 3;
        db.record_pass(&first).unwrap();

        let mut second = PassSummary::new(Service::LastFm);
        second.failed = 1;
        second.aborted = Some("session rejected".into());
        db.record_pass(&second).unwrap();

        let last = db.last_pass(Service::LastFm).unwrap().unwrap();
        assert_eq!(last.failed, 1);
        assert_eq!(last.aborted.as_deref(), Some("session rejected"));
        assert_eq!(db.stats().unwrap().total_passes, 2);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let mut db = SqliteLedger::open(&path).unwrap();
            db.record(&test_track("55"), Service::ListenBrainz, Mark::Hated, None).unwrap();
        }
        let db = SqliteLedger::open(&path).unwrap();
        let entry = db.get("55", Service::ListenBrainz).unwrap().unwrap();
        assert_eq!(entry.mark, Mark::Hated);
    }

    #[test]
    fn test_remote_id_round_trip() {
        let mut db = SqliteLedger::open_in_memory().unwrap();
        let t = test_track("7");
        db.record(&t, Service::ListenBrainz, Mark::Loved, Some("rec-a")).unwrap();
        let entry = db.get("7", Service::ListenBrainz).unwrap().unwrap();
        assert_eq!(entry.remote_id.as_deref(), Some("rec-a"));

        // Same mark, new remote id: the row follows the destination
        db.record(&t, Service::ListenBrainz, Mark::Loved, Some("rec-b")).unwrap();
        let entry = db.get("7", Service::ListenBrainz).unwrap().unwrap();
        assert_eq!(entry.remote_id.as_deref(), Some("rec-b"));
    }

    #[test]
    fn test_v1_ledger_upgrades_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE ledger_entries (
                    source_id TEXT NOT NULL,
                    destination TEXT NOT NULL,
                    mark TEXT NOT NULL CHECK (mark IN ('loved', 'hated')),
                    artist TEXT NOT NULL,
                    title TEXT NOT NULL,
                    album TEXT,
                    mbid TEXT,
                    added_at TEXT NOT NULL,
                    PRIMARY KEY (source_id, destination)
                );
                INSERT INTO ledger_entries VALUES
                    ('9', 'listenbrainz', 'loved', 'Phish', 'Harry Hood', NULL, NULL, '2024-05-01T00:00:00Z');
                PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let db = SqliteLedger::open(&path).unwrap();
        let entry = db.get("9", Service::ListenBrainz).unwrap().unwrap();
        assert_eq!(entry.mark, Mark::Loved);
        assert!(entry.remote_id.is_none());
    }

    #[test]
    fn test_rejects_unknown_mark() {
        let db = SqliteLedger::open_in_memory().unwrap();
        let res = db.conn.execute(
            "INSERT INTO ledger_entries (source_id, destination, mark, artist, title, added_at)
             VALUES ('1', 'lastfm', 'neutral', 'a', 't', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(res.is_err());
    }
}
