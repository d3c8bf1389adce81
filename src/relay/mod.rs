//! Reconciliation engine.
//!
//! A run takes one [`Snapshot`] of the source library and, for each
//! destination in turn, diffs it against that destination's ledger entries
//! and applies the resulting [`Plan`]. The ledger only changes after the
//! destination confirms a call, so a failed action is retried on the next run.

pub mod plan;

use indicatif::{ProgressBar, ProgressStyle};

use crate::classify::Mark;
use crate::config::RelaySettings;
use crate::destination::{Destination, DestinationError, Service};
use crate::ledger::{LedgerError, LedgerStore, PassSummary};
use crate::track::TrackIdentity;

pub use plan::{Action, Plan, Snapshot, Step, plan_destination, plan_retraction};

/// Pass summaries for every destination touched by a run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub passes: Vec<PassSummary>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.passes.iter().all(PassSummary::is_clean)
    }

    pub fn aborted(&self) -> usize {
        self.passes.iter().filter(|p| p.aborted.is_some()).count()
    }
}

/// Why an action stopped the rest of the pass.
struct Abort(String);

pub struct Relay<'a, L: LedgerStore> {
    ledger: &'a mut L,
    settings: &'a RelaySettings,
    show_progress: bool,
}

impl<'a, L: LedgerStore> Relay<'a, L> {
    pub fn new(ledger: &'a mut L, settings: &'a RelaySettings) -> Self {
        Self {
            ledger,
            settings,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Reconcile every destination against the snapshot, one after another.
    pub fn run(&mut self, snapshot: &Snapshot, destinations: &mut [Box<dyn Destination>]) -> RunReport {
        let mut report = RunReport::default();
        for dest in destinations.iter_mut() {
            let dest = dest.as_mut();
            let caps = dest.capabilities();
            let summary = self.pass(dest, |ledger, service, settings| {
                let entries = ledger.destination_entries(service)?;
                Ok(plan_destination(snapshot, &settings.thresholds, &entries, caps))
            });
            report.passes.push(summary);
        }
        report
    }

    /// Compute each destination's plan without calling any adapter.
    pub fn preview(
        &self,
        snapshot: &Snapshot,
        destinations: &[Box<dyn Destination>],
    ) -> Result<Vec<(Service, Plan)>, LedgerError> {
        destinations
            .iter()
            .map(|dest| {
                let service = dest.service();
                let entries = self.ledger.destination_entries(service)?;
                let plan = plan_destination(snapshot, &self.settings.thresholds, &entries, dest.capabilities());
                Ok((service, plan))
            })
            .collect()
    }

    /// Withdraw every classification the relay placed and erase the ledger.
    /// Classifications the user set directly are never touched.
    pub fn retract_all(&mut self, destinations: &mut [Box<dyn Destination>]) -> RunReport {
        let mut report = RunReport::default();
        for dest in destinations.iter_mut() {
            let summary = self.pass(dest.as_mut(), |ledger, service, _| {
                let entries = ledger.destination_entries(service)?;
                Ok(plan_retraction(&entries))
            });
            report.passes.push(summary);
        }
        report
    }

    /// Verify, plan, apply and record one destination's pass.
    fn pass<F>(&mut self, dest: &mut dyn Destination, make_plan: F) -> PassSummary
    where
        F: FnOnce(&L, Service, &RelaySettings) -> Result<Plan, LedgerError>,
    {
        let service = dest.service();
        let mut summary = PassSummary::new(service);

        if let Err(e) = dest.verify() {
            log::error!("{service}: {e}, skipping this destination");
            summary.aborted = Some(e.to_string());
            return self.finish(summary);
        }

        let plan = match make_plan(&*self.ledger, service, self.settings) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("{service}: cannot read ledger: {e}");
                summary.aborted = Some(format!("ledger read failed: {e}"));
                return self.finish(summary);
            }
        };

        log::info!(
            "{service}: {} actions planned, {} already in sync",
            plan.actions.len(),
            plan.unchanged
        );

        let pb = self.progress_bar(plan.actions.len());
        for action in &plan.actions {
            pb.set_message(action.track.title.clone());
            if let Err(Abort(reason)) = self.apply(dest, action, &mut summary) {
                log::error!("{service}: {reason}, aborting pass");
                summary.aborted = Some(reason);
                break;
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        self.finish(summary)
    }

    fn finish(&mut self, mut summary: PassSummary) -> PassSummary {
        summary.finished_at = chrono::Utc::now();
        log::info!(
            "{}: {} added, {} removed, {} replaced, {} not found, {} failed",
            summary.destination,
            summary.added,
            summary.removed,
            summary.replaced,
            summary.not_found,
            summary.failed
        );
        if let Err(e) = self.ledger.record_pass(&summary) {
            log::warn!("Failed to record pass history for {}: {e}", summary.destination);
        }
        summary
    }

    fn apply(&mut self, dest: &mut dyn Destination, action: &Action, summary: &mut PassSummary) -> Result<(), Abort> {
        let service = dest.service();
        let track = &action.track;

        match &action.step {
            Step::Add { mark } => {
                let remote_id = match dest.add(track, *mark) {
                    Ok(id) => id,
                    Err(e) => return self.action_failed(service, track, e, summary),
                };
                log::info!("{service}: new {mark}: {track}");
                if self.record(service, track, *mark, remote_id.as_deref(), summary) {
                    summary.added += 1;
                }
            }
            Step::Remove { mark, remote_id } => {
                if let Err(e) = dest.remove(track, *mark, remote_id.as_deref()) {
                    return self.action_failed(service, track, e, summary);
                }
                if action.orphan {
                    log::info!("{service}: removed {mark} from deleted track {track}");
                } else {
                    log::info!("{service}: removed {mark}: {track}");
                }
                if self.erase(service, track, summary) {
                    summary.removed += 1;
                }
            }
            Step::Replace {
                from,
                to,
                previous,
                previous_remote_id,
            } => {
                if let Err(e) = dest.remove(previous, *from, previous_remote_id.as_deref()) {
                    return self.action_failed(service, previous, e, summary);
                }
                if !self.erase(service, previous, summary) {
                    return Ok(());
                }
                let remote_id = match dest.add(track, *to) {
                    Ok(id) => id,
                    Err(e) => {
                        // Old mark is gone remotely and from the ledger
                        summary.removed += 1;
                        return self.action_failed(service, track, e, summary);
                    }
                };
                log::info!("{service}: {from} -> {to}: {track}");
                if self.record(service, track, *to, remote_id.as_deref(), summary) {
                    summary.replaced += 1;
                } else {
                    summary.removed += 1;
                }
            }
        }
        Ok(())
    }

    fn record(
        &mut self,
        service: Service,
        track: &TrackIdentity,
        mark: Mark,
        remote_id: Option<&str>,
        summary: &mut PassSummary,
    ) -> bool {
        match self.ledger.record(track, service, mark, remote_id) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{service}: {mark} applied to {track} but not recorded: {e}");
                summary.persistence_failures += 1;
                false
            }
        }
    }

    fn erase(&mut self, service: Service, track: &TrackIdentity, summary: &mut PassSummary) -> bool {
        match self.ledger.erase(&track.source_id, service) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{service}: mark removed from {track} but ledger entry kept: {e}");
                summary.persistence_failures += 1;
                false
            }
        }
    }

    fn action_failed(
        &self,
        service: Service,
        track: &TrackIdentity,
        err: DestinationError,
        summary: &mut PassSummary,
    ) -> Result<(), Abort> {
        match err {
            DestinationError::Auth(msg) => Err(Abort(format!("authentication failed: {msg}"))),
            DestinationError::NotFound(msg) => {
                log::warn!("{service}: skipping {track}: {msg}");
                summary.not_found += 1;
                Ok(())
            }
            other => {
                log::warn!("{service}: {track} failed: {other}");
                summary.failed += 1;
                Ok(())
            }
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress || len == 0 {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}
