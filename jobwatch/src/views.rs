//! Presentation payloads for the dashboard and the job path segment converter.
//!
//! Nothing here touches a source. Payloads are built from what the engine
//! already holds, and links point at the routes a serving layer exposes:
//! `/jobs/<segment>/`, `/jobs/<segment>/stdout` and `/jobs/<segment>/stderr`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::engine::{Delta, ReconciliationEngine};
use crate::error::{JobwatchError, JobwatchResult};
use crate::job::{Job, JobId};
use crate::table::Stamp;

static SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:_\d+)?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = JobwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Stream::Stdout),
            "stderr" => Ok(Stream::Stderr),
            other => Err(JobwatchError::parse(format!("unknown stream '{}'", other))),
        }
    }
}

/// Recorded output path of a job, handed to whatever tails the file.
pub fn stream_path(job: &Job, stream: Stream) -> Option<&str> {
    match stream {
        Stream::Stdout => job.std_out.as_deref(),
        Stream::Stderr => job.std_err.as_deref(),
    }
}

/// Converts between the `digits(_digits)?` path segment and stored jobs.
pub struct JobRef;

impl JobRef {
    /// Accepts exactly a bare id or a composite task id.
    pub fn parse(segment: &str) -> JobwatchResult<JobId> {
        if !SEGMENT.is_match(segment) {
            return Err(JobwatchError::parse(format!(
                "'{}' is not a job path segment",
                segment
            )));
        }
        JobId::parse(segment)
    }

    /// Stored record behind a segment. Malformed segments resolve to nothing.
    pub async fn resolve(engine: &ReconciliationEngine, segment: &str) -> Option<Job> {
        let id = JobRef::parse(segment).ok()?;
        engine.get(&id).await
    }

    /// Segment of a job, with leading zeros dropped from numeric parts.
    pub fn segment(job: &Job) -> String {
        let task = job
            .array_job_id
            .as_deref()
            .zip(job.array_task_id.as_deref())
            .and_then(|(array, task)| Some((array.parse::<u64>().ok()?, task.parse::<u64>().ok()?)));
        if let Some((array, task)) = task {
            return format!("{}_{}", array, task);
        }

        let normalise = |part: &str| part.parse::<u64>().map_or_else(|_| part.to_string(), |n| n.to_string());
        match job.id.task_id() {
            Some(task) => format!("{}_{}", normalise(job.id.array_job_id()), normalise(task)),
            None => normalise(job.id.as_str()),
        }
    }

    pub fn link(job: &Job) -> String {
        format!("/jobs/{}/", JobRef::segment(job))
    }

    pub fn stream_link(job: &Job, stream: Stream) -> String {
        format!("/jobs/{}/{}", JobRef::segment(job), stream)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedJob {
    pub id: JobId,
    pub step: Option<String>,
    pub language: Option<String>,
    pub collection: Option<String>,
    pub slurm: Job,
    pub stdout: String,
    pub stderr: String,
    pub link: String,
    pub last_update: Stamp,
}

impl ListedJob {
    pub fn new(job: Job, last_update: Stamp) -> Self {
        let classification = job.classification();
        ListedJob {
            id: job.id.clone(),
            step: classification.step,
            language: classification.language,
            collection: classification.collection,
            stdout: JobRef::stream_link(&job, Stream::Stdout),
            stderr: JobRef::stream_link(&job, Stream::Stderr),
            link: JobRef::link(&job),
            slurm: job,
            last_update,
        }
    }
}

/// Jobs changed since some point, as of the refresh `timestamp`.
#[derive(Debug, Clone, Serialize)]
pub struct JobListing {
    pub timestamp: Stamp,
    pub jobs: Vec<ListedJob>,
}

impl JobListing {
    pub fn from_delta(delta: Delta, classified_only: bool) -> Self {
        let jobs = delta
            .jobs
            .into_iter()
            .filter(|(job, _)| !classified_only || job.classification().is_classified())
            .map(|(job, stamp)| ListedJob::new(job, stamp))
            .collect();
        JobListing {
            timestamp: delta.timestamp,
            jobs,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    pub id: JobId,
    pub slurm: Job,
    pub stdout: String,
    pub stderr: String,
}

impl JobDetail {
    pub fn new(job: Job) -> Self {
        JobDetail {
            id: job.id.clone(),
            stdout: JobRef::stream_link(&job, Stream::Stdout),
            stderr: JobRef::stream_link(&job, Stream::Stderr),
            slurm: job,
        }
    }
}
