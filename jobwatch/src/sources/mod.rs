//! Source adapters.
//!
//! Each adapter turns one external channel into a finite batch of `Job`
//! drafts with fully resolved ids:
//! - `SubmissionLog`: replays the append-only submission log
//! - `SqueueSource`: the scheduler's live queue
//! - `SacctSource`: the accounting/history store
//! - `ScontrolSource`: the controller's single-job detail record
//!
//! The engine only sees the traits, so tests drive it with in-memory fakes.

pub mod command;
pub mod detail;
pub mod history;
pub mod live;
pub mod submission_log;
pub mod tabular;

pub use command::{CommandRunner, TokioCommandRunner};
pub use detail::ScontrolSource;
pub use history::SacctSource;
pub use live::SqueueSource;
pub use submission_log::SubmissionLog;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;

use crate::error::JobwatchResult;
use crate::job::{Job, JobId};

/// Replays previously issued submissions.
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Submissions logged at or after `since` (scheduler-local time).
    /// `None` replays the whole log.
    async fn submissions_since(&self, since: Option<NaiveDateTime>) -> JobwatchResult<Vec<Job>>;

    /// The logged draft for one bare or composite id.
    async fn submission(&self, id: &JobId) -> JobwatchResult<Option<Job>>;
}

/// Point-in-time listing of the jobs the scheduler currently holds.
#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn snapshot(&self) -> JobwatchResult<Vec<Job>>;
}

/// Accounting records for a set of ids. The scope only bounds the query;
/// an empty scope yields nothing.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn history(&self, scope: &BTreeSet<String>) -> JobwatchResult<Vec<Job>>;
}

/// The controller's full record for one job, while it still remembers it.
#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn detail(&self, id: &JobId) -> JobwatchResult<Option<Job>>;
}

/// Which source a report or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SubmissionLog,
    History,
    Live,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::SubmissionLog => "submission_log",
            SourceKind::History => "history",
            SourceKind::Live => "live",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a job from a scheduler row under an id the adapter resolved itself.
pub(crate) fn job_from_row(row: &tabular::Row, id: JobId) -> Job {
    let mut job = Job::new(id);
    for (key, value) in row.iter().filter(|(key, _)| key.as_str() != "JobId") {
        job.set_field(key, value);
    }
    job
}

/// Expand one scheduler row into one job per task id. The row's own fields
/// are shared by every task.
pub(crate) fn expand_tasks(
    row: &tabular::Row,
    array_job_id: &str,
    tasks: &[u64],
) -> JobwatchResult<Vec<Job>> {
    tasks
        .iter()
        .map(|task| {
            let mut job = job_from_row(row, JobId::task(array_job_id, *task)?);
            job.array_job_id = Some(array_job_id.to_string());
            job.array_task_id = Some(task.to_string());
            Ok(job)
        })
        .collect()
}
