use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::classify::{Capabilities, Classification, Mark, Thresholds};
use crate::ledger::LedgerEntry;
use crate::track::{Observation, RawTrack, TrackIdentity};

/// One run's view of the source library.
///
/// Built once per run and shared by every destination, so all destinations
/// diff against the same data.
#[derive(Debug, Default)]
pub struct Snapshot {
    observations: Vec<Observation>,
    /// Source ids whose records could not be resolved this run. Their ledger
    /// entries are left alone rather than treated as deleted tracks.
    unresolved: HashSet<String>,
    skipped: usize,
}

impl Snapshot {
    pub fn build(records: Vec<RawTrack>) -> Self {
        let observed_at = Utc::now();
        let mut snapshot = Self::default();
        let mut seen = HashSet::new();

        for raw in records {
            match TrackIdentity::resolve(&raw) {
                Ok(track) => {
                    if !seen.insert(track.source_id.clone()) {
                        log::warn!("Duplicate source id {} in snapshot, ignoring {track}", track.source_id);
                        snapshot.skipped += 1;
                        continue;
                    }
                    snapshot.observations.push(Observation {
                        track,
                        rating: raw.rating,
                        observed_at,
                    });
                }
                Err(e) => {
                    log::warn!("Skipping track: {e}");
                    if let Some(id) = e.source_id() {
                        snapshot.unresolved.insert(id.to_string());
                    }
                    snapshot.skipped += 1;
                }
            }
        }

        snapshot
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Records dropped for identity errors or duplication.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_unresolved(&self, source_id: &str) -> bool {
        self.unresolved.contains(source_id)
    }

    /// Count of observations per classification, for the run summary.
    pub fn tally(&self, thresholds: &Thresholds) -> (usize, usize) {
        self.observations
            .iter()
            .fold((0, 0), |(loved, hated), o| match thresholds.classify(o.rating) {
                Classification::Loved => (loved + 1, hated),
                Classification::Hated => (loved, hated + 1),
                Classification::Neutral => (loved, hated),
            })
    }
}

/// `remote_id` fields carry the destination key stored in the ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Add {
        mark: Mark,
    },
    Remove {
        mark: Mark,
        remote_id: Option<String>,
    },
    /// Retract `from` as it was submitted for `previous`, then apply `to`.
    Replace {
        from: Mark,
        to: Mark,
        previous: TrackIdentity,
        previous_remote_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub track: TrackIdentity,
    pub step: Step,
    /// The track is no longer in the source snapshot.
    pub orphan: bool,
}

/// Ordered actions for one destination.
#[derive(Debug, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// Tracks already in the desired state.
    pub unchanged: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn count(&self, pred: impl Fn(&Step) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(&a.step)).count()
    }
}

/// Diff the snapshot against one destination's ledger entries.
///
/// Observed tracks come first in snapshot order, then orphaned ledger
/// entries sorted by source id. Capabilities only gate what gets added;
/// every stale entry is retracted, including marks the destination no
/// longer accepts.
pub fn plan_destination(
    snapshot: &Snapshot,
    thresholds: &Thresholds,
    entries: &[LedgerEntry],
    caps: Capabilities,
) -> Plan {
    let mut plan = Plan::default();
    let mut ledger: HashMap<&str, &LedgerEntry> = entries
        .iter()
        .map(|e| (e.track.source_id.as_str(), e))
        .collect();

    for obs in snapshot.observations() {
        let desired = caps.gate(thresholds.classify(obs.rating));
        let existing = ledger.remove(obs.track.source_id.as_str());

        match (desired.mark(), existing) {
            (Some(mark), None) => plan.actions.push(Action {
                track: obs.track.clone(),
                step: Step::Add { mark },
                orphan: false,
            }),
            (Some(mark), Some(entry)) if entry.mark == mark => plan.unchanged += 1,
            (Some(mark), Some(entry)) => plan.actions.push(Action {
                track: obs.track.clone(),
                step: Step::Replace {
                    from: entry.mark,
                    to: mark,
                    previous: entry.track.clone(),
                    previous_remote_id: entry.remote_id.clone(),
                },
                orphan: false,
            }),
            (None, Some(entry)) => plan.actions.push(removal(entry, false)),
            // Never relay-managed: whatever the destination holds is the user's
            (None, None) => {}
        }
    }

    let mut orphans: Vec<&LedgerEntry> = ledger
        .into_values()
        .filter(|e| !snapshot.is_unresolved(&e.track.source_id))
        .collect();
    orphans.sort_by(|a, b| a.track.source_id.cmp(&b.track.source_id));
    plan.actions
        .extend(orphans.into_iter().map(|entry| removal(entry, true)));

    plan
}

/// Retract every ledger entry for a destination (reset mode).
pub fn plan_retraction(entries: &[LedgerEntry]) -> Plan {
    Plan {
        actions: entries.iter().map(|entry| removal(entry, false)).collect(),
        unchanged: 0,
    }
}

fn removal(entry: &LedgerEntry, orphan: bool) -> Action {
    Action {
        track: entry.track.clone(),
        step: Step::Remove {
            mark: entry.mark,
            remote_id: entry.remote_id.clone(),
        },
        orphan,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Service;

    fn raw(id: &str, rating: Option<f64>) -> RawTrack {
        RawTrack {
            source_id: Some(id.to_string()),
            artist: Some("Talking Heads".to_string()),
            title: format!("Track {id}").into(),
            album: None,
            mbid: None,
            rating,
        }
    }

    fn entry(id: &str, mark: Mark) -> LedgerEntry {
        LedgerEntry {
            track: TrackIdentity::resolve(&raw(id, None)).unwrap(),
            destination: Service::ListenBrainz,
            mark,
            added_at: Utc::now(),
            remote_id: None,
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds::new(8.0, Some(2.0)).unwrap()
    }

    const ALL: Capabilities = Capabilities::LOVED_AND_HATED;

    #[test]
    fn test_new_love_is_added() {
        let snap = Snapshot::build(vec![raw("1", Some(9.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[], ALL);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].step, Step::Add { mark: Mark::Loved });
    }

    #[test]
    fn test_matching_entry_is_noop() {
        let snap = Snapshot::build(vec![raw("1", Some(9.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[entry("1", Mark::Loved)], ALL);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_stale_entry_is_replaced() {
        let snap = Snapshot::build(vec![raw("1", Some(9.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[entry("1", Mark::Hated)], ALL);
        assert_eq!(plan.actions.len(), 1);
        assert!(matches!(
            plan.actions[0].step,
            Step::Replace { from: Mark::Hated, to: Mark::Loved, .. }
        ));
    }

    #[test]
    fn test_neutral_with_entry_is_removed() {
        let snap = Snapshot::build(vec![raw("1", Some(5.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[entry("1", Mark::Loved)], ALL);
        assert_eq!(plan.actions[0].step, Step::Remove { mark: Mark::Loved, remote_id: None });
        assert!(!plan.actions[0].orphan);
    }

    #[test]
    fn test_neutral_without_entry_is_untouched() {
        let snap = Snapshot::build(vec![raw("1", Some(5.0)), raw("2", None)]);
        let plan = plan_destination(&snap, &thresholds(), &[], ALL);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn test_orphans_are_removed_in_order() {
        let snap = Snapshot::build(vec![]);
        let entries = [entry("9", Mark::Loved), entry("3", Mark::Hated)];
        let plan = plan_destination(&snap, &thresholds(), &entries, ALL);
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].track.source_id, "3");
        assert!(plan.actions.iter().all(|a| a.orphan));
    }

    #[test]
    fn test_unresolved_tracks_are_not_orphaned() {
        let mut broken = raw("4", Some(9.0));
        broken.artist = None;
        let snap = Snapshot::build(vec![broken]);
        assert_eq!(snap.skipped(), 1);
        assert!(snap.is_unresolved("4"));

        let plan = plan_destination(&snap, &thresholds(), &[entry("4", Mark::Loved)], ALL);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_hate_degrades_without_capability() {
        let snap = Snapshot::build(vec![raw("1", Some(1.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[], Capabilities::LOVED_ONLY);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_stale_love_removed_when_now_hated_without_capability() {
        let snap = Snapshot::build(vec![raw("1", Some(1.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[entry("1", Mark::Loved)], Capabilities::LOVED_ONLY);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].step, Step::Remove { mark: Mark::Loved, remote_id: None });
    }

    #[test]
    fn test_hate_no_longer_accepted_is_still_retracted() {
        let snap = Snapshot::build(vec![raw("1", Some(5.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[entry("1", Mark::Hated)], Capabilities::LOVED_ONLY);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].step, Step::Remove { mark: Mark::Hated, remote_id: None });
    }

    #[test]
    fn test_hate_flips_to_love_without_hate_capability() {
        let snap = Snapshot::build(vec![raw("1", Some(10.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[entry("1", Mark::Hated)], Capabilities::LOVED_ONLY);
        assert_eq!(plan.actions.len(), 1);
        assert!(matches!(
            plan.actions[0].step,
            Step::Replace { from: Mark::Hated, to: Mark::Loved, .. }
        ));
    }

    #[test]
    fn test_removal_carries_stored_remote_id() {
        let mut stored = entry("1", Mark::Loved);
        stored.remote_id = Some("rec-1".into());
        let plan = plan_destination(&Snapshot::build(vec![]), &thresholds(), &[stored.clone()], ALL);
        assert_eq!(
            plan.actions[0].step,
            Step::Remove { mark: Mark::Loved, remote_id: Some("rec-1".into()) }
        );

        let snap = Snapshot::build(vec![raw("1", Some(1.0))]);
        let plan = plan_destination(&snap, &thresholds(), &[stored], ALL);
        assert!(matches!(
            &plan.actions[0].step,
            Step::Replace { previous_remote_id: Some(id), .. } if id == "rec-1"
        ));
    }

    #[test]
    fn test_duplicate_source_ids_keep_first() {
        let snap = Snapshot::build(vec![raw("1", Some(9.0)), raw("1", Some(1.0))]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.skipped(), 1);
        assert_eq!(snap.observations()[0].rating, Some(9.0));
    }

    #[test]
    fn test_retraction_plan() {
        let entries = [entry("1", Mark::Loved), entry("2", Mark::Hated)];
        let plan = plan_retraction(&entries);
        assert_eq!(plan.actions.len(), 2);
        assert!(plan.actions.iter().all(|a| matches!(a.step, Step::Remove { .. })));
    }

    #[test]
    fn test_tally() {
        let snap = Snapshot::build(vec![raw("1", Some(9.0)), raw("2", Some(1.0)), raw("3", Some(5.0))]);
        assert_eq!(snap.tally(&thresholds()), (1, 1));
    }
}
