//! Invocation of the scheduler's command-line tools.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::error::{JobwatchError, JobwatchResult};

/// Runs an external tool and hands back its stdout.
///
/// Any failure to produce output (missing binary, non-zero exit, deadline
/// expiry) is reported as `SourceUnavailable`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> JobwatchResult<String>;
}

/// Production runner backed by `tokio::process`, bounded by a deadline.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    deadline: Duration,
}

impl TokioCommandRunner {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> JobwatchResult<String> {
        debug!("Running {} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must not leave the tool running.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobwatchError::unavailable(program, format!("failed to spawn: {}", e)))?;

        let output = match timeout(self.deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(JobwatchError::unavailable(
                    program,
                    format!("process error: {}", e),
                ));
            }
            Err(_) => {
                return Err(JobwatchError::unavailable(
                    program,
                    format!("timed out after {}ms", self.deadline.as_millis()),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobwatchError::unavailable(
                program,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
