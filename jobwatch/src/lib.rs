// jobwatch Library
// Job-state reconciliation backend for a Slurm operations dashboard

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod sources;
pub mod table;
pub mod views;

pub use crate::config::JobwatchConfig;
pub use crate::engine::{Delta, ReconciliationEngine, RefreshOutcome, Sources};
pub use crate::error::{JobwatchError, JobwatchResult};
pub use crate::job::{Classification, Job, JobId, JobState};
pub use crate::table::{Draft, JobTable};
