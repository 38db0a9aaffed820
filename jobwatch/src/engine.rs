//! Job-state reconciliation engine.
//!
//! Owns the long-lived `JobTable` and the time of the last refresh. Each
//! `refresh()` cycle:
//! 1. takes the active (non-terminal or state-less) jobs as the cycle's scratch table
//! 2. replays the submission log since the last refresh
//! 3. asks the accounting store about the active ids
//! 4. takes the full live queue snapshot
//! 5. marks every active job no source reported as CANCELLED
//! 6. commits the scratch table under one fresh stamp
//!
//! Step 5 is a heuristic. A job that drops out of every listing for one cycle,
//! including because a source was briefly unavailable, is marked CANCELLED
//! even though nothing confirmed it ended.
//!
//! Refreshes are serialized and single-flight: callers that arrive while a
//! cycle is running wait for it and share its outcome. Readers take a shared
//! lock and see the table either before or after a commit, never in between.

use chrono::{Local, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::JobwatchConfig;
use crate::error::JobwatchResult;
use crate::job::{Job, JobId, JobState};
use crate::sources::{
    CommandRunner, DetailSource, HistorySource, LiveSource, SacctSource, ScontrolSource,
    SourceKind, SqueueSource, SubmissionLog, SubmissionSource, TokioCommandRunner,
};
use crate::table::{Draft, JobTable, MergeSummary, Stamp};

/// The external channels the engine reconciles.
#[derive(Clone)]
pub struct Sources {
    pub submissions: Arc<dyn SubmissionSource>,
    pub history: Arc<dyn HistorySource>,
    pub live: Arc<dyn LiveSource>,
    /// Only used by `inspect`.
    pub detail: Option<Arc<dyn DetailSource>>,
}

impl Sources {
    /// Slurm adapters wired to the configured tools.
    pub fn slurm(config: &JobwatchConfig) -> JobwatchResult<Self> {
        let user = config.scheduler.resolved_user()?;
        let runner: Arc<dyn CommandRunner> =
            Arc::new(TokioCommandRunner::new(config.scheduler.command_timeout()));
        Ok(Self {
            submissions: Arc::new(SubmissionLog::new(config.submission_log.path.clone())),
            history: Arc::new(SacctSource::new(
                runner.clone(),
                config.scheduler.sacct.clone(),
                user.clone(),
            )),
            live: Arc::new(
                SqueueSource::new(runner.clone(), config.scheduler.squeue.clone(), user)
                    .with_format(config.scheduler.squeue_format.clone()),
            ),
            detail: Some(Arc::new(ScontrolSource::new(
                runner,
                config.scheduler.scontrol.clone(),
            ))),
        })
    }
}

/// What one source contributed to a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    /// Number of drafts yielded; `None` when the source was skipped.
    pub yielded: Option<usize>,
    pub error: Option<String>,
}

impl SourceReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one refresh cycle.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Stamp of the commit; the new `last_refresh`.
    pub timestamp: Stamp,
    /// The cycle's scratch table: every job the cycle looked at.
    pub touched: JobTable,
    /// Active jobs no source reported, merged as CANCELLED.
    pub presumed_cancelled: Vec<JobId>,
    pub reports: Vec<SourceReport>,
    /// Effect of the commit on the long-lived table.
    pub committed: MergeSummary,
}

impl RefreshOutcome {
    pub fn report(&self, source: SourceKind) -> Option<&SourceReport> {
        self.reports.iter().find(|r| r.source == source)
    }
}

/// Jobs changed after a point in time, read under one lock together with the
/// refresh time they are current as of.
#[derive(Debug, Clone)]
pub struct Delta {
    pub timestamp: Stamp,
    pub jobs: Vec<(Job, Stamp)>,
}

struct Snapshot {
    table: JobTable,
    last_refresh: Stamp,
    /// When the submission log was last read. The next cycle replays from
    /// here, so lines appended while a cycle was querying are not lost.
    log_read_at: Stamp,
}

pub struct ReconciliationEngine {
    sources: Sources,
    state: RwLock<Snapshot>,
    /// Serializes refreshes; holds the outcome of the last completed cycle.
    refresh_gate: Mutex<Option<Arc<RefreshOutcome>>>,
    completed_cycles: AtomicU64,
}

/// Keep a source's drafts, or record why it contributed nothing.
fn collect(
    kind: SourceKind,
    result: JobwatchResult<Vec<Job>>,
    reports: &mut Vec<SourceReport>,
) -> Vec<Job> {
    match result {
        Ok(jobs) => {
            reports.push(SourceReport {
                source: kind,
                yielded: Some(jobs.len()),
                error: None,
            });
            jobs
        }
        Err(e) => {
            if e.is_transient() {
                warn!("[Engine] {} skipped this cycle: {}", kind, e);
            } else {
                error!("[Engine] {} returned unusable data: {}", kind, e);
            }
            reports.push(SourceReport {
                source: kind,
                yielded: None,
                error: Some(e.to_string()),
            });
            Vec::new()
        }
    }
}

/// Submission log timestamps are scheduler-local with second resolution.
fn log_cursor(stamp: Stamp) -> chrono::NaiveDateTime {
    let local = stamp.with_timezone(&Local).naive_local();
    local.with_nanosecond(0).unwrap_or(local)
}

/// Stamps strictly increase across commits, even if the wall clock steps back.
fn next_stamp(previous: Stamp) -> Stamp {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

impl ReconciliationEngine {
    /// Build the initial table from the submission log over `lookback`, the
    /// accounting rows of those submissions and the live queue.
    pub async fn bootstrap(sources: Sources, lookback: chrono::Duration) -> Self {
        let started = Utc::now();
        let mut reports = Vec::new();
        let mut scratch = JobTable::new();

        let logged = collect(
            SourceKind::SubmissionLog,
            sources
                .submissions
                .submissions_since(Some(log_cursor(started - lookback)))
                .await,
            &mut reports,
        );
        let scope: BTreeSet<String> = logged
            .iter()
            .map(|job| job.id.array_job_id().to_string())
            .collect();
        scratch.merge(logged.into_iter().map(Draft::from), None);

        let history = collect(
            SourceKind::History,
            sources.history.history(&scope).await,
            &mut reports,
        );
        scratch.merge(history.into_iter().map(Draft::from), None);

        let live = collect(SourceKind::Live, sources.live.snapshot().await, &mut reports);
        scratch.merge(live.into_iter().map(Draft::from), None);

        let stamp = next_stamp(started);
        let table = JobTable::from_jobs(scratch.into_jobs(), Some(stamp));
        let log_read_at = match reports.first() {
            Some(report) if report.is_ok() => started,
            _ => started - lookback,
        };
        info!(
            "[Engine] Bootstrapped {} jobs ({} sources ok)",
            table.len(),
            reports.iter().filter(|r| r.is_ok()).count()
        );

        Self {
            sources,
            state: RwLock::new(Snapshot {
                table,
                last_refresh: stamp,
                log_read_at,
            }),
            refresh_gate: Mutex::new(None),
            completed_cycles: AtomicU64::new(0),
        }
    }

    /// Run one reconciliation cycle, or join the one already in flight.
    pub async fn refresh(&self) -> Arc<RefreshOutcome> {
        let observed = self.completed_cycles.load(Ordering::Acquire);
        let mut gate = self.refresh_gate.lock().await;

        if self.completed_cycles.load(Ordering::Acquire) != observed {
            if let Some(outcome) = gate.as_ref() {
                debug!("[Engine] Joined refresh committed at {}", outcome.timestamp);
                return outcome.clone();
            }
        }

        let outcome = Arc::new(self.run_cycle().await);
        *gate = Some(outcome.clone());
        self.completed_cycles.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn run_cycle(&self) -> RefreshOutcome {
        let (mut scratch, known, log_since) = {
            let snapshot = self.state.read().await;
            (
                snapshot.table.filter(Job::is_active),
                snapshot.table.ids(),
                snapshot.log_read_at,
            )
        };
        let active_ids = scratch.ids();
        let mut seen: BTreeSet<JobId> = BTreeSet::new();
        let mut reports = Vec::new();

        let log_read_at = Utc::now();
        let logged = collect(
            SourceKind::SubmissionLog,
            self.sources
                .submissions
                .submissions_since(Some(log_cursor(log_since)))
                .await,
            &mut reports,
        );
        seen.extend(logged.iter().map(|job| job.id.clone()));
        // A replayed line only fills gaps in a record already on file, so the
        // log's PENDING never overwrites an observed state.
        let logged: Vec<Draft> = logged
            .into_iter()
            .filter_map(|job| {
                if !known.contains(&job.id) {
                    return Some(Draft::from(job));
                }
                scratch.get(&job.id).map(|current| Draft::from(job.union(current)))
            })
            .collect();
        scratch.merge(logged, None);

        let scope: BTreeSet<String> = active_ids.iter().map(|id| id.to_string()).collect();
        let history = collect(
            SourceKind::History,
            self.sources.history.history(&scope).await,
            &mut reports,
        );
        seen.extend(history.iter().map(|job| job.id.clone()));
        scratch.merge(history.into_iter().map(Draft::from), None);

        let live = collect(
            SourceKind::Live,
            self.sources.live.snapshot().await,
            &mut reports,
        );
        seen.extend(live.iter().map(|job| job.id.clone()));
        scratch.merge(live.into_iter().map(Draft::from), None);

        let presumed_cancelled: Vec<JobId> = active_ids.difference(&seen).cloned().collect();
        if !presumed_cancelled.is_empty() {
            warn!(
                "[Engine] {} active jobs missing from every source, presuming CANCELLED: {}",
                presumed_cancelled.len(),
                presumed_cancelled
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
        }
        scratch.merge(
            presumed_cancelled
                .iter()
                .map(|id| Draft::from(Job::with_state(id.clone(), JobState::Cancelled))),
            None,
        );

        let (timestamp, committed) = {
            let mut snapshot = self.state.write().await;
            let stamp = next_stamp(snapshot.last_refresh);
            let committed = snapshot
                .table
                .merge(scratch.jobs().cloned().map(Draft::from), Some(stamp));
            snapshot.last_refresh = stamp;
            if reports.iter().any(|r| r.source == SourceKind::SubmissionLog && r.is_ok()) {
                snapshot.log_read_at = log_read_at;
            }
            (stamp, committed)
        };

        info!(
            "[Engine] Refresh committed at {}: {} touched, {} inserted, {} updated, {} presumed cancelled",
            timestamp,
            scratch.len(),
            committed.inserted,
            committed.updated,
            presumed_cancelled.len()
        );

        RefreshOutcome {
            timestamp,
            touched: scratch,
            presumed_cancelled,
            reports,
            committed,
        }
    }

    /// Stored record for `id`, as of the last refresh.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.state.read().await.table.get(id).cloned()
    }

    /// Entry including its change stamp.
    pub async fn get_with_stamp(&self, id: &JobId) -> Option<(Job, Option<Stamp>)> {
        self.state
            .read()
            .await
            .table
            .entry(id)
            .map(|entry| (entry.job.clone(), entry.changed_at))
    }

    pub async fn last_refresh(&self) -> Stamp {
        self.state.read().await.last_refresh
    }

    /// Jobs whose stored stamp is strictly after `since`.
    pub async fn changed_since(&self, since: Stamp) -> Delta {
        let snapshot = self.state.read().await;
        Delta {
            timestamp: snapshot.last_refresh,
            jobs: snapshot.table.changed_since(since),
        }
    }

    /// Copy of the whole table.
    pub async fn table(&self) -> JobTable {
        self.state.read().await.table.clone()
    }

    /// Copy of the entries matching `predicate`, stamps preserved.
    pub async fn filter<F>(&self, predicate: F) -> JobTable
    where
        F: Fn(&Job) -> bool,
    {
        self.state.read().await.table.filter(predicate)
    }

    /// Fresh view of one job: the stored record (or its logged submission when
    /// the table does not know it) overlaid with its accounting row and the
    /// controller's detail record. Nothing is committed to the table.
    pub async fn inspect(&self, id: &JobId) -> Option<Job> {
        let mut job = match self.get(id).await {
            Some(job) => Some(job),
            None => self
                .sources
                .submissions
                .submission(id)
                .await
                .unwrap_or_else(|e| {
                    warn!("[Engine] Submission lookup for {} failed: {}", id, e);
                    None
                }),
        };

        let scope: BTreeSet<String> = [id.to_string()].into_iter().collect();
        let detail = async {
            match &self.sources.detail {
                Some(detail) => detail.detail(id).await,
                None => Ok(None),
            }
        };
        let (history, detail) = futures::join!(self.sources.history.history(&scope), detail);

        let mut overlays = Vec::new();
        match history {
            Ok(rows) => overlays.extend(rows.into_iter().filter(|row| &row.id == id)),
            Err(e) => warn!("[Engine] Inspecting {} without accounting data: {}", id, e),
        }
        match detail {
            Ok(record) => overlays.extend(record),
            Err(e) => warn!("[Engine] Inspecting {} without controller detail: {}", id, e),
        }
        for overlay in overlays {
            job = Some(match job {
                Some(current) => current.union(&overlay),
                None => overlay,
            });
        }
        job
    }
}
