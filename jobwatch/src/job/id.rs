//! Canonical job identity.
//!
//! A `JobId` is either a bare numeric id (`4711`) or the composite id of one
//! array task (`4711_3`). Range notation never makes it into a `JobId`: the
//! source adapters expand ranges before constructing ids.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{JobwatchError, JobwatchResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl JobId {
    /// Parse a fully resolved id. Anything else, including collapsed array
    /// ranges such as `500[2-4]` or `100_1-3`, is a parse error.
    pub fn parse(raw: &str) -> JobwatchResult<Self> {
        let valid = match raw.split_once('_') {
            Some((job, task)) => is_digits(job) && is_digits(task),
            None => is_digits(raw),
        };
        if valid {
            Ok(JobId(raw.to_string()))
        } else {
            Err(JobwatchError::parse(format!("'{}' is not a resolved job id", raw)))
        }
    }

    /// Composite id of one task of an array job.
    pub fn task(array_job_id: &str, task_id: u64) -> JobwatchResult<Self> {
        if !is_digits(array_job_id) {
            return Err(JobwatchError::parse(format!(
                "'{}' is not a numeric array job id",
                array_job_id
            )));
        }
        Ok(JobId(format!("{}_{}", array_job_id, task_id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id of the submission this job belongs to: the part before `_` for
    /// array tasks, the whole id otherwise.
    pub fn array_job_id(&self) -> &str {
        match self.0.split_once('_') {
            Some((job, _)) => job,
            None => &self.0,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.0.split_once('_').map(|(_, task)| task)
    }

    pub fn is_task(&self) -> bool {
        self.task_id().is_some()
    }

    fn sort_key(&self) -> (u64, Option<u64>) {
        let job = self.array_job_id().parse().unwrap_or(u64::MAX);
        let task = self.task_id().map(|t| t.parse().unwrap_or(u64::MAX));
        (job, task)
    }
}

impl Ord for JobId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for JobId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = JobwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobId::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobwatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobId::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}
