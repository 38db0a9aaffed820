//! Submission log replay.
//!
//! The submission wrapper appends one line per issued `sbatch` call:
//!
//! ```text
//! 20240301101500 4711 --array=1-3 -J align-de-web -o logs/%A_%a.out run.sh de
//! ```
//!
//! Each line is scanned back into job drafts. Array submissions expand into
//! one draft per task with per-task output paths.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::SubmissionSource;
use crate::error::{JobwatchError, JobwatchResult};
use crate::job::{
    parse_array_spec, resolve_path_template, Job, JobId, JobState, PathMacros, LOG_TIME_FORMAT,
};

/// Options of the submission command the scanner understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedSubmission {
    pub dependency: Option<String>,
    pub num_tasks: Option<String>,
    pub num_nodes: Option<String>,
    pub num_cpus: Option<String>,
    pub account: Option<String>,
    pub partition: Option<String>,
    pub name: Option<String>,
    pub array: Option<String>,
    pub time_limit: Option<String>,
    pub std_out: Option<String>,
    pub std_err: Option<String>,
    pub command: Option<Vec<String>>,
}

/// Split `--flag=value` into `--flag value`. Short options never use `=`.
fn normalize_args<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut out = Vec::with_capacity(args.len());
    for &arg in args {
        match arg.strip_prefix("--").and_then(|rest| rest.split_once('=')) {
            Some((flag, value)) if !flag.is_empty() && !value.is_empty() => {
                out.push(&arg[..flag.len() + 2]);
                out.push(value);
            }
            _ => out.push(arg),
        }
    }
    out
}

/// Scan the argument list of one submission.
///
/// Anything before the script is expected to be a known option. An unknown
/// flag, or a flag missing its value, is a parse error: the scanner does not
/// guess how many values a foreign option takes.
pub fn scan_arguments(args: &[&str]) -> JobwatchResult<ScannedSubmission> {
    let args = normalize_args(args);
    let mut scanned = ScannedSubmission::default();
    let mut it = args.iter().copied().enumerate();

    while let Some((pos, arg)) = it.next() {
        let mut value = |flag: &str| -> JobwatchResult<String> {
            it.next()
                .map(|(_, v)| v.to_string())
                .ok_or_else(|| JobwatchError::parse(format!("option '{}' is missing its value", flag)))
        };
        match arg {
            "--parsable" | "--verbose" | "--exclusive" => {}
            "--nice" | "--mem-per-cpu" | "--export" => {
                value(arg)?;
            }
            "-d" | "--dependency" => scanned.dependency = Some(value(arg)?),
            "-n" | "--ntasks" => scanned.num_tasks = Some(value(arg)?),
            "-N" | "--nodes" => scanned.num_nodes = Some(value(arg)?),
            "-A" | "--account" => scanned.account = Some(value(arg)?),
            "-p" | "--partition" => scanned.partition = Some(value(arg)?),
            "-J" | "--job-name" => scanned.name = Some(value(arg)?),
            "-a" | "--array" => scanned.array = Some(value(arg)?),
            "-t" | "--time" => scanned.time_limit = Some(value(arg)?),
            "-c" | "--cpus-per-task" => scanned.num_cpus = Some(value(arg)?),
            "-o" | "--output" => scanned.std_out = Some(value(arg)?),
            "-e" | "--error" => scanned.std_err = Some(value(arg)?),
            _ if !arg.starts_with('-') => {
                scanned.command = Some(args[pos..].iter().map(|a| a.to_string()).collect());
                break;
            }
            _ => {
                return Err(JobwatchError::parse(format!(
                    "cannot parse submission option '{}'",
                    arg
                )))
            }
        }
    }
    Ok(scanned)
}

/// Turn one logged submission into job drafts.
pub fn jobs_from_submission(
    job_id: &str,
    submitted: NaiveDateTime,
    args: &[&str],
) -> JobwatchResult<Vec<Job>> {
    let scanned = scan_arguments(args)?;

    let mut template = Job::new(JobId::parse(job_id)?);
    template.state = Some(JobState::Pending);
    template.submit_time = Some(submitted);
    template.name = scanned.name.clone();
    template.dependency = scanned.dependency.clone();
    template.num_tasks = scanned.num_tasks.clone();
    template.num_nodes = scanned.num_nodes.clone();
    template.num_cpus = scanned.num_cpus.clone();
    template.account = scanned.account.clone();
    template.partition = scanned.partition.clone();
    template.time_limit = scanned.time_limit.clone();
    template.command = scanned.command.clone();

    let resolve = |path: &Option<String>, task_id: Option<u64>| {
        path.as_deref().map(|p| {
            resolve_path_template(
                p,
                &PathMacros {
                    job_id,
                    task_id,
                    name: scanned.name.as_deref(),
                },
            )
        })
    };

    let Some(spec) = scanned.array.as_deref() else {
        template.std_out = resolve(&scanned.std_out, None);
        template.std_err = resolve(&scanned.std_err, None);
        return Ok(vec![template]);
    };

    parse_array_spec(spec)?
        .into_iter()
        .map(|task| {
            let mut job = template.clone();
            job.id = JobId::task(job_id, task)?;
            job.array_job_id = Some(job_id.to_string());
            job.array_task_id = Some(task.to_string());
            job.std_out = resolve(&scanned.std_out, Some(task));
            job.std_err = resolve(&scanned.std_err, Some(task));
            Ok(job)
        })
        .collect()
}

/// A log line split into its three parts.
struct LogLine<'a> {
    timestamp: &'a str,
    job_id: &'a str,
    args: Vec<&'a str>,
}

/// `None` when the line has fewer than three fields.
fn split_line(line: &str) -> Option<LogLine<'_>> {
    let mut parts = line.trim().splitn(3, ' ');
    let timestamp = parts.next().filter(|t| !t.is_empty())?;
    let job_id = parts.next().filter(|id| !id.is_empty())?;
    let rest = parts.next().filter(|rest| !rest.trim().is_empty())?;
    Some(LogLine {
        timestamp,
        job_id,
        args: rest.split_whitespace().collect(),
    })
}

impl LogLine<'_> {
    /// Lines of other tools sharing the log carry a non-numeric id.
    fn is_foreign(&self) -> bool {
        !self.job_id.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Submission log on disk. Read-only: this process never writes it.
#[derive(Debug, Clone)]
pub struct SubmissionLog {
    path: PathBuf,
}

impl SubmissionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> JobwatchResult<String> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            JobwatchError::unavailable(
                "submission_log",
                format!("cannot read {}: {}", self.path.display(), e),
            )
        })
    }

    /// Replay every line accepted by `keep`. Lines that fail to scan are
    /// reported and skipped; the rest of the log still counts.
    fn replay<F>(&self, contents: &str, keep: F) -> Vec<Job>
    where
        F: Fn(&LogLine<'_>, NaiveDateTime) -> bool,
    {
        let mut jobs = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let Some(entry) = split_line(line) else {
                warn!(
                    "Submission log line {}: fewer than three fields, skipping",
                    lineno + 1
                );
                continue;
            };
            if entry.is_foreign() {
                debug!("Skipping foreign submission log line {}", lineno + 1);
                continue;
            }
            let submitted = match NaiveDateTime::parse_from_str(entry.timestamp, LOG_TIME_FORMAT) {
                Ok(ts) => ts,
                Err(_) => {
                    warn!(
                        "Submission log line {}: bad timestamp '{}'",
                        lineno + 1,
                        entry.timestamp
                    );
                    continue;
                }
            };
            if !keep(&entry, submitted) {
                continue;
            }
            match jobs_from_submission(entry.job_id, submitted, &entry.args) {
                Ok(mut batch) => jobs.append(&mut batch),
                Err(e) => warn!("Submission log line {}: {}", lineno + 1, e),
            }
        }
        jobs
    }
}

#[async_trait]
impl SubmissionSource for SubmissionLog {
    async fn submissions_since(&self, since: Option<NaiveDateTime>) -> JobwatchResult<Vec<Job>> {
        let contents = self.read().await?;
        Ok(self.replay(&contents, |_, submitted| {
            since.map_or(true, |since| submitted >= since)
        }))
    }

    async fn submission(&self, id: &JobId) -> JobwatchResult<Option<Job>> {
        let contents = self.read().await?;
        let wanted = id.array_job_id();
        Ok(self
            .replay(&contents, |entry, _| entry.job_id == wanted)
            .into_iter()
            .find(|job| &job.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, LOG_TIME_FORMAT).unwrap()
    }

    fn ids(jobs: &[Job]) -> Vec<String> {
        jobs.iter().map(|j| j.id.to_string()).collect()
    }

    #[test]
    fn test_array_submission_expands_per_task() {
        let args = [
            "--array=1-3",
            "-J",
            "align-de-web",
            "-o",
            "logs/%A_%a.out",
            "-e",
            "logs/%A_%a.err",
            "run.sh",
            "de",
        ];
        let jobs = jobs_from_submission("100", ts("20240301101500"), &args).unwrap();
        assert_eq!(ids(&jobs), vec!["100_1", "100_2", "100_3"]);
        for (n, job) in jobs.iter().enumerate() {
            let task = n + 1;
            assert_eq!(job.std_out, Some(format!("logs/100_{}.out", task)));
            assert_eq!(job.std_err, Some(format!("logs/100_{}.err", task)));
            assert_eq!(job.array_job_id.as_deref(), Some("100"));
            assert_eq!(job.array_task_id, Some(task.to_string()));
            assert_eq!(job.command, Some(vec!["run.sh".to_string(), "de".to_string()]));
            assert_eq!(job.state, Some(JobState::Pending));
        }
    }

    #[test]
    fn test_plain_submission_keeps_bare_id() {
        let args = ["-p", "standard", "-o", "out-%j.log", "-e", "err-%A.log", "job.sh"];
        let jobs = jobs_from_submission("4711", ts("20240301101500"), &args).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.id.as_str(), "4711");
        assert_eq!(job.std_out.as_deref(), Some("out-4711.log"));
        assert_eq!(job.std_err.as_deref(), Some("err-4711.log"));
        assert_eq!(job.partition.as_deref(), Some("standard"));
        assert_eq!(job.submit_time, Some(ts("20240301101500")));
    }

    #[test]
    fn test_array_spec_with_list_and_limit() {
        let jobs =
            jobs_from_submission("7", ts("20240301101500"), &["-a", "1,5-6%2", "x.sh"]).unwrap();
        assert_eq!(ids(&jobs), vec!["7_1", "7_5", "7_6"]);
    }

    #[test]
    fn test_unknown_flag_is_a_parse_error() {
        let err = scan_arguments(&["--gres", "gpu:1", "run.sh"]).unwrap_err();
        assert!(matches!(err, JobwatchError::Parse(_)));
        assert!(err.to_string().contains("--gres"));
    }

    #[test]
    fn test_missing_value_is_a_parse_error() {
        assert!(scan_arguments(&["-J"]).is_err());
    }

    #[test]
    fn test_ignored_options_consume_values() {
        let scanned = scan_arguments(&[
            "--parsable",
            "--nice",
            "10",
            "--mem-per-cpu=4G",
            "--time=01:00:00",
            "-c",
            "8",
            "script.sh",
            "--not-an-option-for-us",
        ])
        .unwrap();
        assert_eq!(scanned.time_limit.as_deref(), Some("01:00:00"));
        assert_eq!(scanned.num_cpus.as_deref(), Some("8"));
        assert_eq!(
            scanned.command,
            Some(vec!["script.sh".to_string(), "--not-an-option-for-us".to_string()])
        );
    }

    fn write_log(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[tokio::test]
    async fn test_replay_skips_foreign_and_bad_lines() {
        let file = write_log(&[
            "20240301100000 100 -J clean-fr-web run.sh",
            "20240301100100 Submitted batch job",
            "20240301100200 101 --gres gpu:1 run.sh",
            "notatime 102 run.sh",
            "",
            "20240301100300 103 -a 0-1 run.sh",
        ]);
        let log = SubmissionLog::new(file.path());
        let jobs = log.submissions_since(None).await.unwrap();
        assert_eq!(ids(&jobs), vec!["100", "103_0", "103_1"]);
    }

    #[tokio::test]
    async fn test_replay_skips_short_lines() {
        let file = write_log(&[
            "20240301100000 100",
            "20240301100100",
            "20240301100200 101 ",
            "20240301100300 102 run.sh",
        ]);
        let log = SubmissionLog::new(file.path());
        let jobs = log.submissions_since(None).await.unwrap();
        assert_eq!(ids(&jobs), vec!["102"]);
        assert_eq!(jobs[0].command, Some(vec!["run.sh".to_string()]));
    }

    #[tokio::test]
    async fn test_since_is_inclusive() {
        let file = write_log(&[
            "20240301100000 100 run.sh",
            "20240301110000 200 run.sh",
            "20240301120000 300 run.sh",
        ]);
        let log = SubmissionLog::new(file.path());
        let jobs = log
            .submissions_since(Some(ts("20240301110000")))
            .await
            .unwrap();
        assert_eq!(ids(&jobs), vec!["200", "300"]);
    }

    #[tokio::test]
    async fn test_single_submission_lookup() {
        let file = write_log(&[
            "20240301100000 100 -a 1-2 -o o-%a run.sh",
            "20240301110000 200 run.sh",
        ]);
        let log = SubmissionLog::new(file.path());
        let task = log
            .submission(&JobId::parse("100_2").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.std_out.as_deref(), Some("o-2"));
        assert!(log
            .submission(&JobId::parse("100_9").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_log_is_unavailable() {
        let log = SubmissionLog::new("/nonexistent/jobwatch/.schedule-log");
        let err = log.submissions_since(None).await.unwrap_err();
        assert!(err.is_transient());
    }
}
