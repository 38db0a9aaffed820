//! Accounting history adapter (`sacct`).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::tabular::{parse_delimited, Row};
use super::{expand_tasks, job_from_row, CommandRunner, HistorySource};
use crate::error::{JobwatchError, JobwatchResult};
use crate::job::{parse_array_spec, Job, JobId};

// `123`, `123_4`, `123[4-6]`, `123[4]`, `123_[4-6,9%2]`
static ACCOUNTING_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<job>\d+)(?:_(?P<task>\d+)|_?\[(?P<range>[0-9,\-]+)(?:%\d+)?\])?$").unwrap()
});

fn rename_accounting_column(header: &str) -> Option<&'static str> {
    match header {
        "JobID" => Some("JobId"),
        "JobState" => Some("State"),
        "Submit" => Some("SubmitTime"),
        _ => None,
    }
}

/// Normalize one accounting row.
///
/// Returns `Ok(None)` for rows describing job steps (`123.batch`,
/// `123_4.extern`, `123.0`); those are not jobs in their own right.
pub fn jobs_from_accounting_row(row: &Row) -> JobwatchResult<Option<Vec<Job>>> {
    let raw_id = row
        .get("JobId")
        .map(|s| s.trim())
        .ok_or_else(|| JobwatchError::parse("accounting row has no JobID"))?;

    let Some(caps) = ACCOUNTING_ID.captures(raw_id) else {
        return Ok(None);
    };
    let job_id = &caps["job"];

    if let Some(task) = caps.name("task") {
        let task: u64 = task
            .as_str()
            .parse()
            .map_err(|e| JobwatchError::parse(format!("task id in '{}': {}", raw_id, e)))?;
        return expand_tasks(row, job_id, &[task]).map(Some);
    }

    if let Some(range) = caps.name("range") {
        // One row standing in for a whole collapsed array.
        return expand_tasks(row, job_id, &parse_array_spec(range.as_str())?).map(Some);
    }

    Ok(Some(vec![job_from_row(row, JobId::parse(job_id)?)]))
}

/// Parse complete `sacct --parsable2` output.
pub fn parse_accounting_output(output: &str) -> Vec<Job> {
    let mut jobs = Vec::new();
    for row in parse_delimited(output, rename_accounting_column) {
        match jobs_from_accounting_row(&row) {
            Ok(Some(mut batch)) => jobs.append(&mut batch),
            Ok(None) => {}
            Err(e) => warn!("Skipping accounting row {:?}: {}", row.get("JobId"), e),
        }
    }
    jobs
}

pub struct SacctSource {
    runner: Arc<dyn CommandRunner>,
    program: String,
    user: String,
}

impl SacctSource {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
impl HistorySource for SacctSource {
    async fn history(&self, scope: &BTreeSet<String>) -> JobwatchResult<Vec<Job>> {
        if scope.is_empty() {
            debug!("History scope is empty, skipping {}", self.program);
            return Ok(Vec::new());
        }
        let args = vec![
            "--parsable2".to_string(),
            "--user".to_string(),
            self.user.clone(),
            "--format".to_string(),
            "ALL".to_string(),
            "--jobs".to_string(),
            scope.iter().cloned().collect::<Vec<_>>().join(","),
        ];
        let output = self.runner.run(&self.program, &args).await?;
        Ok(parse_accounting_output(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    const HEADER: &str = "JobID|JobIDRaw|JobName|State|Submit|Elapsed";

    fn ids(jobs: &[Job]) -> Vec<String> {
        jobs.iter().map(|j| j.id.to_string()).collect()
    }

    #[test]
    fn test_collapsed_range_expands() {
        let output = format!(
            "{}\n500[2-4]|500|align-de-web|PENDING|2024-03-01T10:00:00|00:00:00\n",
            HEADER
        );
        let jobs = parse_accounting_output(&output);
        assert_eq!(ids(&jobs), vec!["500_2", "500_3", "500_4"]);
        assert!(jobs.iter().all(|j| j.array_job_id.as_deref() == Some("500")));
        assert_eq!(jobs[1].array_task_id.as_deref(), Some("3"));
        assert_eq!(jobs[0].state, Some(JobState::Pending));
        assert!(jobs[0].submit_time.is_some());
    }

    #[test]
    fn test_single_bracket_and_underscore_forms() {
        let output = format!(
            "{}\n{}\n{}\n{}\n",
            HEADER,
            "600[7]|600|n|PENDING||",
            "601_[1,3%1]|601|n|PENDING||",
            "602_9|602|n|COMPLETED||00:10:00",
        );
        assert_eq!(
            ids(&parse_accounting_output(&output)),
            vec!["600_7", "601_1", "601_3", "602_9"]
        );
    }

    #[test]
    fn test_step_rows_are_skipped() {
        let output = format!(
            "{}\n{}\n{}\n{}\n{}\n",
            HEADER,
            "700|700|dedupe-en-web|CANCELLED by 42||",
            "700.batch|700.batch|batch|CANCELLED||",
            "700.extern|700.extern|extern|COMPLETED||",
            "701_2.0|701_2.0|step|FAILED||",
        );
        let jobs = parse_accounting_output(&output);
        assert_eq!(ids(&jobs), vec!["700"]);
        assert_eq!(jobs[0].state, Some(JobState::Cancelled));
    }

    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, _program: &str, args: &[String]) -> JobwatchResult<String> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(format!("{}\n", HEADER))
        }
    }

    #[tokio::test]
    async fn test_empty_scope_is_a_no_op() {
        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
        });
        let source = SacctSource::new(runner.clone(), "sacct", "alice");
        assert!(source.history(&BTreeSet::new()).await.unwrap().is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());

        let scope: BTreeSet<String> = ["12_3".to_string(), "11".to_string()].into_iter().collect();
        source.history(&scope).await.unwrap();
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].last().map(String::as_str), Some("11,12_3"));
    }
}
