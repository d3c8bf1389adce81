use std::collections::BTreeMap;

use chrono::Utc;

use super::models::{LedgerEntry, PassSummary};
use super::{LedgerError, LedgerStore, Result};
use crate::classify::Mark;
use crate::destination::Service;
use crate::track::TrackIdentity;

/// In-memory ledger for tests.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: BTreeMap<(Service, String), LedgerEntry>,
    passes: Vec<PassSummary>,
    read_only: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, simulating a storage fault.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn passes(&self) -> &[PassSummary] {
        &self.passes
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(LedgerError::Write("ledger is read-only".to_string()))
        } else {
            Ok(())
        }
    }
}

impl LedgerStore for MemoryLedger {
    fn destination_entries(&self, destination: Service) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|((d, _), _)| *d == destination)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn get(&self, source_id: &str, destination: Service) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.get(&(destination, source_id.to_string())).cloned())
    }

    fn record(
        &mut self,
        track: &TrackIdentity,
        destination: Service,
        mark: Mark,
        remote_id: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let key = (destination, track.source_id.clone());
        if self
            .entries
            .get(&key)
            .is_some_and(|e| e.mark == mark && e.remote_id.as_deref() == remote_id)
        {
            return Ok(());
        }
        self.entries.insert(
            key,
            LedgerEntry {
                track: track.clone(),
                destination,
                mark,
                added_at: Utc::now(),
                remote_id: remote_id.map(str::to_string),
            },
        );
        Ok(())
    }

    fn erase(&mut self, source_id: &str, destination: Service) -> Result<()> {
        self.check_writable()?;
        self.entries.remove(&(destination, source_id.to_string()));
        Ok(())
    }

    fn record_pass(&mut self, summary: &PassSummary) -> Result<()> {
        self.check_writable()?;
        self.passes.push(summary.clone());
        Ok(())
    }

    fn last_pass(&self, destination: Service) -> Result<Option<PassSummary>> {
        Ok(self
            .passes
            .iter()
            .rev()
            .find(|p| p.destination == destination)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> TrackIdentity {
        TrackIdentity {
            source_id: id.to_string(),
            artist: "Phish".to_string(),
            title: "Tweezer".to_string(),
            album: None,
            mbid: None,
        }
    }

    #[test]
    fn test_record_erase() {
        let mut ledger = MemoryLedger::new();
        ledger.record(&track("1"), Service::LastFm, Mark::Loved, None).unwrap();
        ledger.record(&track("1"), Service::LastFm, Mark::Loved, None).unwrap();
        assert_eq!(ledger.len(), 1);

        ledger.erase("1", Service::LastFm).unwrap();
        ledger.erase("1", Service::LastFm).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut ledger = MemoryLedger::new();
        ledger.set_read_only(true);
        assert!(ledger.record(&track("1"), Service::LastFm, Mark::Loved, None).is_err());
        assert!(ledger.is_empty());
    }
}
