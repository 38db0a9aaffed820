//! Live queue adapter (`squeue`).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::tabular::{parse_delimited, Row};
use super::{expand_tasks, job_from_row, CommandRunner, LiveSource};
use crate::error::{JobwatchError, JobwatchResult};
use crate::job::{parse_array_spec, Job, JobId};

/// `%i|%K|%F|%C|%b|%j|%P|%r|%u|%y|%T|%M|%b|%N`
pub const DEFAULT_QUEUE_FORMAT: &str = "%i|%K|%F|%C|%b|%j|%P|%r|%u|%y|%T|%M|%b|%N";

fn rename_queue_column(header: &str) -> Option<&'static str> {
    match header {
        "JOBID" => Some("JobId"),
        "NAME" => Some("JobName"),
        "STATE" => Some("State"),
        "ARRAY_TASK_ID" => Some("ArrayTaskId"),
        "ARRAY_JOB_ID" => Some("ArrayJobId"),
        "TIME" => Some("Elapsed"),
        "REASON" => Some("Reason"),
        _ => None,
    }
}

/// Normalize one queue row into jobs.
///
/// The queue reports three shapes: a plain job (`ArrayTaskId` is `N/A`), a
/// single running task, and a still-pending array whose `ArrayTaskId` is a
/// range or list. The last one expands into one job per task.
pub fn jobs_from_queue_row(row: &Row) -> JobwatchResult<Vec<Job>> {
    let task_spec = row.get("ArrayTaskId").map(|s| s.trim()).unwrap_or("N/A");

    if task_spec == "N/A" || task_spec.is_empty() {
        let raw_id = row
            .get("JobId")
            .ok_or_else(|| JobwatchError::parse("queue row has no JOBID"))?;
        let mut plain = row.clone();
        plain.remove("ArrayJobId");
        plain.remove("ArrayTaskId");
        return Ok(vec![job_from_row(&plain, JobId::parse(raw_id.trim())?)]);
    }

    let array_job_id = row
        .get("ArrayJobId")
        .map(|s| s.trim())
        .ok_or_else(|| JobwatchError::parse(format!("array task '{}' has no ARRAY_JOB_ID", task_spec)))?;

    if task_spec.bytes().all(|b| b.is_ascii_digit()) {
        let task: u64 = task_spec
            .parse()
            .map_err(|e| JobwatchError::parse(format!("task id '{}': {}", task_spec, e)))?;
        return expand_tasks(row, array_job_id, &[task]);
    }

    let spec = task_spec.trim_start_matches('[').trim_end_matches(']');
    expand_tasks(row, array_job_id, &parse_array_spec(spec)?)
}

/// Parse complete `squeue` output. Rows that fit no known shape are skipped.
pub fn parse_queue_output(output: &str) -> Vec<Job> {
    let mut jobs = Vec::new();
    for row in parse_delimited(output, rename_queue_column) {
        match jobs_from_queue_row(&row) {
            Ok(mut batch) => jobs.append(&mut batch),
            Err(e) => warn!("Skipping queue row {:?}: {}", row.get("JobId"), e),
        }
    }
    jobs
}

pub struct SqueueSource {
    runner: Arc<dyn CommandRunner>,
    program: String,
    user: String,
    format: String,
}

impl SqueueSource {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            user: user.into(),
            format: DEFAULT_QUEUE_FORMAT.to_string(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

#[async_trait]
impl LiveSource for SqueueSource {
    async fn snapshot(&self) -> JobwatchResult<Vec<Job>> {
        let args = vec![
            "--user".to_string(),
            self.user.clone(),
            "--format".to_string(),
            self.format.clone(),
        ];
        let output = self.runner.run(&self.program, &args).await?;
        Ok(parse_queue_output(&output))
    }
}
