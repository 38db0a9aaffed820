//! Single-job detail adapter (`scontrol show job`).

use async_trait::async_trait;
use std::sync::Arc;

use super::tabular::{parse_key_values, Row};
use super::{job_from_row, CommandRunner, DetailSource};
use crate::error::{JobwatchError, JobwatchResult};
use crate::job::{Job, JobId};

/// Turn a controller record into a job. Array tasks get their composite id.
pub fn job_from_detail(mut record: Row) -> JobwatchResult<Option<Job>> {
    if record.is_empty() {
        return Ok(None);
    }
    if let Some(state) = record.remove("JobState") {
        record.insert("State".to_string(), state);
    }
    let id = match (record.get("ArrayJobId"), record.get("ArrayTaskId")) {
        (Some(job), Some(task)) => {
            let task: u64 = task
                .parse()
                .map_err(|e| JobwatchError::parse(format!("ArrayTaskId '{}': {}", task, e)))?;
            JobId::task(job, task)?
        }
        _ => {
            let raw = record
                .get("JobId")
                .ok_or_else(|| JobwatchError::parse("detail record has no JobId"))?;
            JobId::parse(raw)?
        }
    };
    Ok(Some(job_from_row(&record, id)))
}

pub struct ScontrolSource {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl ScontrolSource {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

#[async_trait]
impl DetailSource for ScontrolSource {
    async fn detail(&self, id: &JobId) -> JobwatchResult<Option<Job>> {
        let args = vec![
            "--details".to_string(),
            "show".to_string(),
            "job".to_string(),
            id.to_string(),
        ];
        let output = self.runner.run(&self.program, &args).await?;
        job_from_detail(parse_key_values(&output))
    }
}
