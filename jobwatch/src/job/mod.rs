//! Canonical per-job record.
//!
//! Every source adapter produces `Job` drafts: the fields it knows about are
//! set, everything else is `None`. Keys the scheduler reports that the record
//! does not model are kept verbatim in `extra`, so new scheduler columns flow
//! through to the dashboard without code changes.

pub mod array;
pub mod classify;
pub mod id;
pub mod state;

pub use array::{parse_array_spec, resolve_path_template, PathMacros};
pub use classify::{classify, Classification};
pub use id::JobId;
pub use state::JobState;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp layout used by the submission log.
pub const LOG_TIME_FORMAT: &str = "%Y%m%d%H%M%S";
/// Timestamp layout used by `sacct` and `scontrol`.
pub const SCHEDULER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Where an unparseable `SubmitTime` is kept, apart from the typed slot.
pub const RAW_SUBMIT_TIME_KEY: &str = "SubmitTimeRaw";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "JobId")]
    pub id: JobId,
    #[serde(rename = "ArrayJobId", skip_serializing_if = "Option::is_none", default)]
    pub array_job_id: Option<String>,
    #[serde(rename = "ArrayTaskId", skip_serializing_if = "Option::is_none", default)]
    pub array_task_id: Option<String>,
    #[serde(rename = "State", skip_serializing_if = "Option::is_none", default)]
    pub state: Option<JobState>,
    #[serde(rename = "JobName", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "SubmitTime", skip_serializing_if = "Option::is_none", default)]
    pub submit_time: Option<NaiveDateTime>,
    #[serde(rename = "Command", skip_serializing_if = "Option::is_none", default)]
    pub command: Option<Vec<String>>,
    #[serde(rename = "StdOut", skip_serializing_if = "Option::is_none", default)]
    pub std_out: Option<String>,
    #[serde(rename = "StdErr", skip_serializing_if = "Option::is_none", default)]
    pub std_err: Option<String>,
    #[serde(rename = "Dependency", skip_serializing_if = "Option::is_none", default)]
    pub dependency: Option<String>,
    #[serde(rename = "NumTasks", skip_serializing_if = "Option::is_none", default)]
    pub num_tasks: Option<String>,
    #[serde(rename = "NumNodes", skip_serializing_if = "Option::is_none", default)]
    pub num_nodes: Option<String>,
    #[serde(rename = "NumCPUs", skip_serializing_if = "Option::is_none", default)]
    pub num_cpus: Option<String>,
    #[serde(rename = "Account", skip_serializing_if = "Option::is_none", default)]
    pub account: Option<String>,
    #[serde(rename = "Partition", skip_serializing_if = "Option::is_none", default)]
    pub partition: Option<String>,
    #[serde(rename = "TimeLimit", skip_serializing_if = "Option::is_none", default)]
    pub time_limit: Option<String>,
    #[serde(rename = "Elapsed", skip_serializing_if = "Option::is_none", default)]
    pub elapsed: Option<String>,
    #[serde(rename = "Reason", skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    /// Scheduler fields without a dedicated slot.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

macro_rules! overlay_fields {
    ($base:expr, $draft:expr; $($field:ident),* $(,)?) => {
        $(
            if $draft.$field.is_some() {
                $base.$field = $draft.$field.clone();
            }
        )*
    };
}

impl Job {
    pub fn new(id: JobId) -> Self {
        Job {
            id,
            array_job_id: None,
            array_task_id: None,
            state: None,
            name: None,
            submit_time: None,
            command: None,
            std_out: None,
            std_err: None,
            dependency: None,
            num_tasks: None,
            num_nodes: None,
            num_cpus: None,
            account: None,
            partition: None,
            time_limit: None,
            elapsed: None,
            reason: None,
            extra: BTreeMap::new(),
        }
    }

    /// Draft that only carries a state, as produced by the dead-job heuristic.
    pub fn with_state(id: JobId, state: JobState) -> Self {
        let mut job = Job::new(id);
        job.state = Some(state);
        job
    }

    /// Route one scheduler field into its slot. Empty values are treated as
    /// undefined and ignored.
    pub fn set_field(&mut self, key: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let owned = || Some(value.to_string());
        match key {
            "ArrayJobId" => self.array_job_id = owned(),
            "ArrayTaskId" => self.array_task_id = owned(),
            "State" => self.state = Some(JobState::parse(value)),
            "JobName" => self.name = owned(),
            "SubmitTime" => match parse_submit_time(value) {
                Some(time) => {
                    self.submit_time = Some(time);
                    self.extra.remove(RAW_SUBMIT_TIME_KEY);
                }
                // "Unknown" and friends stay visible without poisoning the slot.
                None if self.submit_time.is_none() => {
                    self.extra
                        .insert(RAW_SUBMIT_TIME_KEY.to_string(), value.to_string());
                }
                None => {}
            },
            "Command" => {
                self.command = Some(value.split_whitespace().map(str::to_string).collect())
            }
            "StdOut" => self.std_out = owned(),
            "StdErr" => self.std_err = owned(),
            "Dependency" => self.dependency = owned(),
            "NumTasks" => self.num_tasks = owned(),
            "NumNodes" => self.num_nodes = owned(),
            "NumCPUs" => self.num_cpus = owned(),
            "Account" => self.account = owned(),
            "Partition" => self.partition = owned(),
            "TimeLimit" => self.time_limit = owned(),
            "Elapsed" => self.elapsed = owned(),
            "Reason" => self.reason = owned(),
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Field-level union: every field `draft` defines wins, fields only this
    /// record has are preserved.
    pub fn union(&self, draft: &Job) -> Job {
        let mut merged = self.clone();
        overlay_fields!(merged, draft;
            array_job_id, array_task_id, state, name, submit_time, command,
            std_out, std_err, dependency, num_tasks, num_nodes, num_cpus,
            account, partition, time_limit, elapsed, reason,
        );
        for (key, value) in &draft.extra {
            merged.extra.insert(key.clone(), value.clone());
        }
        if merged.submit_time.is_some() {
            merged.extra.remove(RAW_SUBMIT_TIME_KEY);
        }
        merged
    }

    /// Active jobs still need polling: no state yet, or a non-terminal one.
    pub fn is_active(&self) -> bool {
        self.state.as_ref().map_or(true, |s| !s.is_terminal())
    }

    pub fn classification(&self) -> Classification {
        self.name.as_deref().map(classify).unwrap_or_default()
    }
}

/// Accepts both the submission log layout and the ISO layout of the
/// accounting store.
pub fn parse_submit_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, SCHEDULER_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, LOG_TIME_FORMAT))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[test]
    fn test_set_field_routes_known_and_extra_keys() {
        let mut job = Job::new(id("100_2"));
        for (key, value) in [
            ("State", "RUNNING"),
            ("JobName", "align-de-web"),
            ("Elapsed", "00:01:02"),
            ("NODELIST", "node-7"),
            ("Reason", ""),
        ] {
            job.set_field(key, value);
        }
        assert_eq!(job.state, Some(JobState::Running));
        assert_eq!(job.elapsed.as_deref(), Some("00:01:02"));
        assert_eq!(job.extra.get("NODELIST").map(String::as_str), Some("node-7"));
        assert_eq!(job.reason, None);
    }

    #[test]
    fn test_union_overrides_and_preserves() {
        let mut current = Job::new(id("7"));
        current.name = Some("score-en-web".into());
        current.state = Some(JobState::Pending);
        current.extra.insert("NodeList".into(), "n1".into());

        let mut draft = Job::with_state(id("7"), JobState::Running);
        draft.extra.insert("Elapsed2".into(), "5".into());

        let merged = current.union(&draft);
        assert_eq!(merged.state, Some(JobState::Running));
        assert_eq!(merged.name.as_deref(), Some("score-en-web"));
        assert_eq!(merged.extra.len(), 2);
    }

    #[test]
    fn test_submit_time_formats() {
        let a = parse_submit_time("20240301101500").unwrap();
        let b = parse_submit_time("2024-03-01T10:15:00").unwrap();
        assert_eq!(a, b);

        let mut job = Job::new(id("1"));
        job.set_field("SubmitTime", "Unknown");
        assert_eq!(job.submit_time, None);
        assert_eq!(
            job.extra.get(RAW_SUBMIT_TIME_KEY).map(String::as_str),
            Some("Unknown")
        );

        job.set_field("SubmitTime", "20240301101500");
        assert_eq!(job.submit_time, Some(a));
        assert!(job.extra.is_empty());
    }

    #[test]
    fn test_unparseable_submit_time_never_duplicates_the_key() {
        let mut known = Job::new(id("1"));
        known.set_field("SubmitTime", "20240301101500");
        let mut unknown = Job::new(id("1"));
        unknown.set_field("SubmitTime", "Unknown");

        let later = known.union(&unknown);
        let earlier = unknown.union(&known);
        for merged in [&later, &earlier] {
            assert!(merged.extra.get(RAW_SUBMIT_TIME_KEY).is_none());
            let json = serde_json::to_string(merged).unwrap();
            assert_eq!(json.matches("SubmitTime").count(), 1, "{}", json);
            let back: Job = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, merged);
        }

        let mut still_known = known.clone();
        still_known.set_field("SubmitTime", "Unknown");
        assert_eq!(still_known, known);
    }

    #[test]
    fn test_serializes_with_scheduler_keys() {
        let mut job = Job::with_state(id("100_1"), JobState::Completed);
        job.array_job_id = Some("100".into());
        job.extra.insert("ExitCode".into(), "0:0".into());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["JobId"], "100_1");
        assert_eq!(value["State"], "COMPLETED");
        assert_eq!(value["ArrayJobId"], "100");
        assert_eq!(value["ExitCode"], "0:0");
        assert!(value.get("StdOut").is_none());
    }
}
