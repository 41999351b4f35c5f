use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_FIRST_RUN_CAP};
use crate::failure::{ConsecutiveFailureCounter, FailureKind, classify_error};
use crate::history::HistorySource;
use crate::ledger::LedgerStore;
use crate::normalize::{normalize, normalize_artist, sanitize};
use crate::notify::RunReporter;
use crate::played_at::{
    MultilingualDetector, PlayedTodayDetector, today_languages, unknown_labels,
};
use crate::reconcile::{
    LedgerKey, Track, ledger_from_entries, reconcile, stale_keys, upserted_entry,
};
use crate::service::{Scrobbler, Submission};
use crate::timestamp::{TimestampMode, compute_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub timestamps: TimestampMode,
    pub first_run_cap: usize,
    /// Decide and report, but neither submit nor touch the ledger or the failure counter.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            timestamps: TimestampMode::default(),
            first_run_cap: DEFAULT_FIRST_RUN_CAP,
            dry_run: false,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            timestamps: config.timestamps,
            first_run_cap: config.first_run_cap,
            dry_run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NothingToDo,
    Completed,
    PartialFailure,
    Halted(FailureKind),
    FetchFailed(FailureKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub history_count: usize,
    pub today_count: usize,
    pub existing_count: usize,
    pub to_submit_count: usize,
    pub processed_count: usize,
    pub submitted: Vec<String>,
    pub failed: Vec<String>,
    /// Subset of `failed` the service answered but ignored.
    pub ignored: Vec<String>,
    pub status: RunStatus,
    pub consecutive_failures: u32,
    pub deactivate: bool,
    pub dry_run: bool,
}

impl RunSummary {
    fn empty(status: RunStatus, dry_run: bool) -> Self {
        Self {
            history_count: 0,
            today_count: 0,
            existing_count: 0,
            to_submit_count: 0,
            processed_count: 0,
            submitted: Vec::new(),
            failed: Vec::new(),
            ignored: Vec::new(),
            status,
            consecutive_failures: 0,
            deactivate: false,
            dry_run,
        }
    }
}

/// Runs one reconciliation pass against injected collaborators.
pub struct SessionOrchestrator<L: LedgerStore> {
    ledger: L,
    source: Box<dyn HistorySource>,
    scrobbler: Option<Box<dyn Scrobbler>>,
    detector: Box<dyn PlayedTodayDetector>,
    reporters: Vec<Box<dyn RunReporter>>,
    counter: ConsecutiveFailureCounter,
    options: SyncOptions,
}

impl<L: LedgerStore> SessionOrchestrator<L> {
    pub fn new(ledger: L, source: Box<dyn HistorySource>, options: SyncOptions) -> Self {
        Self {
            ledger,
            source,
            scrobbler: None,
            detector: Box::new(MultilingualDetector),
            reporters: Vec::new(),
            counter: ConsecutiveFailureCounter::default(),
            options,
        }
    }

    pub fn with_scrobbler(mut self, scrobbler: Box<dyn Scrobbler>) -> Self {
        self.scrobbler = Some(scrobbler);
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn PlayedTodayDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn RunReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Seeds the counter with the health persisted by earlier runs.
    pub fn with_failure_counter(mut self, counter: ConsecutiveFailureCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn failure_counter(&self) -> ConsecutiveFailureCounter {
        self.counter
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn into_ledger(self) -> L {
        self.ledger
    }

    pub fn run(&mut self) -> Result<RunSummary> {
        self.run_at(Utc::now())
    }

    /// Only ledger I/O errors are returned; fetch and submission failures end up in the summary.
    pub fn run_at(&mut self, now: DateTime<Utc>) -> Result<RunSummary> {
        let dry_run = self.options.dry_run;
        if dry_run {
            info!("Dry run: nothing will be submitted and the ledger stays untouched");
        }

        let history = match self.source.fetch_history() {
            Ok(history) => history,
            Err(err) => return Ok(self.fetch_failed(&err)),
        };

        for label in unknown_labels(&history) {
            warn!("Unrecognized playedAt value {label:?}, treating it as not played today");
        }
        let languages = today_languages(&history);
        if !languages.is_empty() {
            debug!(
                "History labels today in: {}",
                languages.into_iter().collect::<Vec<_>>().join(", ")
            );
        }
        let today: Vec<Track> = history
            .iter()
            .filter(|track| self.detector.is_played_today(track.played_at.as_deref()))
            .cloned()
            .collect();

        if today.is_empty() {
            info!(
                "History: {} | Today: 0 | Existing: 0 | To submit: 0",
                history.len()
            );
            info!("No tracks played today, nothing to submit");
            let mut summary = RunSummary::empty(RunStatus::NothingToDo, dry_run);
            summary.history_count = history.len();
            self.settle_counter(true, None, &mut summary);
            self.report(&summary);
            return Ok(summary);
        }

        let mut ledger = ledger_from_entries(self.ledger.load_entries()?);
        let is_first_run = ledger.is_empty();
        let stale = stale_keys(&today, &ledger);
        for key in &stale {
            if dry_run {
                debug!("Dry run: would drop ledger entry {key}");
            } else {
                self.ledger.delete_entry(key)?;
            }
            ledger.remove(key);
        }
        if !stale.is_empty() {
            info!(
                "Dropped {} ledger entries no longer in today's history",
                stale.len()
            );
        }

        let decisions = reconcile(&today, &ledger, is_first_run, self.options.first_run_cap);
        let to_submit = decisions.iter().filter(|d| d.should_submit).count();
        info!(
            "History: {} | Today: {} | Existing: {} | To submit: {}",
            history.len(),
            today.len(),
            decisions.len() - to_submit,
            to_submit
        );

        let scrobbler = if !dry_run && to_submit > 0 {
            Some(
                self.scrobbler
                    .as_deref()
                    .context("No scrobbler configured for a live run")?,
            )
        } else {
            None
        };
        let policy = self.options.timestamps.policy_for(is_first_run);

        let mut submitted = Vec::new();
        let mut failed = Vec::new();
        let mut ignored = Vec::new();
        let mut last_error = None;
        let mut halted = None;
        let mut processed = 0;
        let mut submit_index = 0;

        for decision in &decisions {
            let name = decision.track.display_name();
            debug!(
                "{name} at position {}: {}{}",
                decision.position,
                decision.reason,
                decision
                    .previous_position
                    .map(|previous| format!(" (was {previous})"))
                    .unwrap_or_default()
            );

            if decision.should_submit {
                let timestamp = compute_timestamp(submit_index, to_submit, policy, now.timestamp())?;
                submit_index += 1;
                let submission = submission_for(&decision.key, timestamp);
                match scrobbler {
                    None => {
                        info!("Dry run: would submit {name} at {timestamp}");
                        submitted.push(name);
                    }
                    Some(scrobbler) => match scrobbler.submit(&submission) {
                        Ok(outcome) if outcome.accepted => {
                            info!("Submitted {name} ({})", decision.reason);
                            submitted.push(name);
                        }
                        Ok(outcome) if outcome.ignored => {
                            match outcome.ignored_reason {
                                Some(reason) => warn!(
                                    "Scrobble of {name} ignored (code {}): {}",
                                    reason.code, reason.message
                                ),
                                None => warn!("Scrobble of {name} ignored"),
                            }
                            ignored.push(name.clone());
                            failed.push(name);
                        }
                        Ok(_) => {
                            warn!("Scrobble of {name} was not accepted");
                            failed.push(name);
                        }
                        Err(err) => {
                            let kind = classify_error(&err);
                            last_error = Some(kind);
                            if kind.is_fatal_for_run() {
                                error!("{kind} failure submitting {name}, halting run: {err:#}");
                                halted = Some(kind);
                                break;
                            }
                            error!("Failed submitting {name} ({kind}): {err:#}");
                            failed.push(name);
                            processed += 1;
                            continue;
                        }
                    },
                }
            }

            if !dry_run {
                let entry = upserted_entry(
                    ledger.get(&decision.key),
                    &decision.key,
                    decision.position,
                    is_first_run,
                    now,
                );
                self.ledger.upsert_entry(entry.clone())?;
                ledger.insert(decision.key.clone(), entry);
            }
            processed += 1;
        }

        let status = match halted {
            Some(kind) => RunStatus::Halted(kind),
            None if to_submit == 0 => RunStatus::NothingToDo,
            None if failed.is_empty() => RunStatus::Completed,
            None => RunStatus::PartialFailure,
        };
        let mut summary = RunSummary {
            history_count: history.len(),
            today_count: today.len(),
            existing_count: decisions.len() - to_submit,
            to_submit_count: to_submit,
            processed_count: processed,
            submitted,
            failed,
            ignored,
            status,
            consecutive_failures: 0,
            deactivate: false,
            dry_run,
        };
        let any_accepted = !dry_run && !summary.submitted.is_empty();
        self.settle_counter(any_accepted, last_error, &mut summary);
        self.report(&summary);
        Ok(summary)
    }

    fn fetch_failed(&mut self, err: &anyhow::Error) -> RunSummary {
        let kind = classify_error(err);
        error!("Failed fetching history ({kind}): {err:#}");
        let mut summary = RunSummary::empty(RunStatus::FetchFailed(kind), self.options.dry_run);
        self.settle_counter(false, Some(kind), &mut summary);
        let message = format!("{err:#}");
        for reporter in &self.reporters {
            if let Err(report_err) = reporter.emit_run_failure(&message) {
                warn!("Failed reporting run failure: {report_err:#}");
            }
        }
        summary
    }

    fn settle_counter(
        &mut self,
        any_accepted: bool,
        last_error: Option<FailureKind>,
        summary: &mut RunSummary,
    ) {
        if !self.options.dry_run {
            match last_error {
                Some(kind) if !any_accepted => {
                    let count = self.counter.record_failure(kind);
                    warn!(
                        "{count} consecutive failed runs, last {kind} (deactivates at {})",
                        kind.deactivation_threshold()
                    );
                }
                _ => self.counter.record_success(),
            }
        }
        summary.consecutive_failures = self.counter.count;
        summary.deactivate = self.counter.should_deactivate();
    }

    fn report(&self, summary: &RunSummary) {
        for reporter in &self.reporters {
            if let Err(err) = reporter.emit_run_summary(summary) {
                warn!("Failed reporting run summary: {err:#}");
            }
        }
    }
}

/// Normalized fields for the logging service; falls back to the sanitized raw text
/// when cleanup would leave nothing.
fn submission_for(key: &LedgerKey, timestamp: i64) -> Submission {
    Submission {
        title: cleaned(&key.title, normalize),
        artist: cleaned(&key.artist, normalize_artist),
        album: cleaned(&key.album, normalize),
        timestamp,
    }
}

fn cleaned(raw: &str, clean: fn(&str) -> String) -> String {
    let value = clean(raw);
    if value.is_empty() { sanitize(raw) } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::service::SubmitOutcome;
    use anyhow::bail;
    use chrono::TimeZone;

    struct FixedHistory(Vec<Track>);

    impl HistorySource for FixedHistory {
        fn fetch_history(&self) -> Result<Vec<Track>> {
            Ok(self.0.clone())
        }
    }

    struct AlwaysAccept;

    impl Scrobbler for AlwaysAccept {
        fn submit(&self, _submission: &Submission) -> Result<SubmitOutcome> {
            Ok(SubmitOutcome::accepted())
        }
    }

    struct FailsWith(&'static str);

    impl Scrobbler for FailsWith {
        fn submit(&self, _submission: &Submission) -> Result<SubmitOutcome> {
            bail!("{}", self.0)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn today(title: &str) -> Track {
        Track::new(title, "Artist", "Album").with_played_at("Today")
    }

    fn orchestrator(history: Vec<Track>) -> SessionOrchestrator<MemoryLedger> {
        SessionOrchestrator::new(
            MemoryLedger::default(),
            Box::new(FixedHistory(history)),
            SyncOptions::default(),
        )
    }

    #[test]
    fn cleans_submission_fields() {
        let key = LedgerKey {
            title: "Song (Official Video)".to_string(),
            artist: "Artist - Topic".to_string(),
            album: "(Remastered)".to_string(),
        };
        let submission = submission_for(&key, 42);
        assert_eq!(submission.title, "Song");
        assert_eq!(submission.artist, "Artist");
        assert_eq!(submission.album, "(Remastered)");
        assert_eq!(submission.timestamp, 42);
    }

    #[test]
    fn first_run_submits_and_records() {
        let mut session =
            orchestrator(vec![today("A"), today("B")]).with_scrobbler(Box::new(AlwaysAccept));
        let summary = session.run_at(now()).unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.submitted, vec!["A by Artist", "B by Artist"]);
        assert_eq!(session.ledger().len(), 2);
        assert_eq!(summary.consecutive_failures, 0);
    }

    #[test]
    fn live_run_without_scrobbler_is_an_error() {
        let mut session = orchestrator(vec![today("A")]);
        assert!(session.run_at(now()).is_err());
    }

    #[test]
    fn nothing_played_today() {
        let mut session = orchestrator(vec![
            Track::new("A", "Artist", "Album").with_played_at("Yesterday"),
        ]);
        let summary = session.run_at(now()).unwrap();
        assert_eq!(summary.status, RunStatus::NothingToDo);
        assert_eq!(summary.history_count, 1);
        assert_eq!(summary.today_count, 0);
    }

    #[test]
    fn non_fatal_errors_are_counted_once_per_run() {
        let mut session = orchestrator(vec![today("A"), today("B")])
            .with_scrobbler(Box::new(FailsWith("connection reset by peer")));
        let summary = session.run_at(now()).unwrap();
        assert_eq!(summary.status, RunStatus::PartialFailure);
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(summary.processed_count, 2);
        assert!(session.ledger().is_empty());
        assert_eq!(
            session.failure_counter().last_kind,
            Some(FailureKind::Network)
        );
        assert_eq!(summary.consecutive_failures, 1);
    }
}
