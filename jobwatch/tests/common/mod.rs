//! In-memory scheduler shared by the engine integration tests.
//!
//! One `FakeScheduler` backs all four source traits. Tests script it between
//! refreshes: submit to the log, put jobs in the queue, write accounting rows
//! or take a source down.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobwatch::sources::{DetailSource, HistorySource, LiveSource, SubmissionSource};
use jobwatch::{Job, JobId, JobState, JobwatchError, JobwatchResult, Sources};

#[derive(Default)]
struct Scheduler {
    log: Vec<(NaiveDateTime, Job)>,
    queue: BTreeMap<JobId, Job>,
    accounting: BTreeMap<JobId, Job>,
    details: BTreeMap<JobId, Job>,
    log_down: bool,
    live_down: bool,
    history_down: bool,
    live_delay: Option<Duration>,
    live_calls: usize,
    history_scopes: Vec<BTreeSet<String>>,
}

#[derive(Clone, Default)]
pub struct FakeScheduler {
    inner: Arc<Mutex<Scheduler>>,
}

pub fn id(raw: &str) -> JobId {
    JobId::parse(raw).unwrap()
}

pub fn job(raw: &str, state: JobState) -> Job {
    Job::with_state(id(raw), state)
}

pub fn named(raw: &str, state: JobState, name: &str) -> Job {
    let mut job = job(raw, state);
    job.name = Some(name.to_string());
    job
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> Sources {
        Sources {
            submissions: Arc::new(self.clone()),
            history: Arc::new(self.clone()),
            live: Arc::new(self.clone()),
            detail: Some(Arc::new(self.clone())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }

    /// Log a submission now, as PENDING.
    pub fn submit(&self, raw: &str) {
        self.submit_at(Local::now().naive_local(), job(raw, JobState::Pending));
    }

    pub fn submit_at(&self, at: NaiveDateTime, job: Job) {
        self.with(|s| s.log.push((at, job)));
    }

    pub fn enqueue(&self, job: Job) {
        self.with(|s| s.queue.insert(job.id.clone(), job));
    }

    pub fn dequeue(&self, raw: &str) {
        self.with(|s| s.queue.remove(&id(raw)));
    }

    pub fn account(&self, job: Job) {
        self.with(|s| s.accounting.insert(job.id.clone(), job));
    }

    pub fn describe(&self, job: Job) {
        self.with(|s| s.details.insert(job.id.clone(), job));
    }

    pub fn set_log_down(&self, down: bool) {
        self.with(|s| s.log_down = down);
    }

    pub fn set_live_down(&self, down: bool) {
        self.with(|s| s.live_down = down);
    }

    pub fn set_history_down(&self, down: bool) {
        self.with(|s| s.history_down = down);
    }

    pub fn set_live_delay(&self, delay: Duration) {
        self.with(|s| s.live_delay = Some(delay));
    }

    pub fn live_calls(&self) -> usize {
        self.with(|s| s.live_calls)
    }

    pub fn last_history_scope(&self) -> Option<BTreeSet<String>> {
        self.with(|s| s.history_scopes.last().cloned())
    }
}

fn down(source: &str) -> JobwatchError {
    JobwatchError::unavailable(source, "scripted outage")
}

#[async_trait]
impl SubmissionSource for FakeScheduler {
    async fn submissions_since(&self, since: Option<NaiveDateTime>) -> JobwatchResult<Vec<Job>> {
        self.with(|s| {
            if s.log_down {
                return Err(down("submission log"));
            }
            Ok(s.log
                .iter()
                .filter(|(at, _)| since.map_or(true, |since| *at >= since))
                .map(|(_, job)| job.clone())
                .collect())
        })
    }

    async fn submission(&self, id: &JobId) -> JobwatchResult<Option<Job>> {
        self.with(|s| {
            if s.log_down {
                return Err(down("submission log"));
            }
            Ok(s.log.iter().map(|(_, job)| job).find(|job| &job.id == id).cloned())
        })
    }
}

#[async_trait]
impl HistorySource for FakeScheduler {
    async fn history(&self, scope: &BTreeSet<String>) -> JobwatchResult<Vec<Job>> {
        self.with(|s| {
            s.history_scopes.push(scope.clone());
            if s.history_down {
                return Err(down("sacct"));
            }
            Ok(s.accounting
                .values()
                .filter(|job| {
                    scope.contains(job.id.as_str()) || scope.contains(job.id.array_job_id())
                })
                .cloned()
                .collect())
        })
    }
}

#[async_trait]
impl LiveSource for FakeScheduler {
    async fn snapshot(&self) -> JobwatchResult<Vec<Job>> {
        let delay = self.with(|s| {
            s.live_calls += 1;
            s.live_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            if s.live_down {
                return Err(down("squeue"));
            }
            Ok(s.queue.values().cloned().collect())
        })
    }
}

#[async_trait]
impl DetailSource for FakeScheduler {
    async fn detail(&self, id: &JobId) -> JobwatchResult<Option<Job>> {
        self.with(|s| Ok(s.details.get(id).cloned()))
    }
}
