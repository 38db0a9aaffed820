//! Keyed job collection with per-entry change stamps.
//!
//! A stamp only moves when a merge actually changes the stored record, which
//! is what makes "jobs changed since T" exact.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::job::{Job, JobId};

pub type Stamp = DateTime<Utc>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub job: Job,
    pub changed_at: Option<Stamp>,
}

/// One job to merge, optionally carrying its own stamp.
#[derive(Debug, Clone)]
pub struct Draft {
    pub job: Job,
    pub stamp: Option<Stamp>,
}

impl Draft {
    pub fn stamped(job: Job, stamp: Stamp) -> Self {
        Draft {
            job,
            stamp: Some(stamp),
        }
    }
}

impl From<Job> for Draft {
    fn from(job: Job) -> Self {
        Draft { job, stamp: None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeSummary {
    pub fn changed(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTable {
    entries: BTreeMap<JobId, Entry>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from drafts, all stamped with `stamp`.
    pub fn from_jobs<I>(jobs: I, stamp: Option<Stamp>) -> Self
    where
        I: IntoIterator<Item = Job>,
    {
        let mut table = JobTable::new();
        table.merge(jobs.into_iter().map(Draft::from), stamp);
        table
    }

    /// Merge drafts into the table.
    ///
    /// A draft's own stamp takes precedence over `default_stamp`. New ids are
    /// inserted with the effective stamp. Known ids get the field union; the
    /// entry is replaced and re-stamped only if the union differs from what
    /// is stored.
    pub fn merge<I>(&mut self, drafts: I, default_stamp: Option<Stamp>) -> MergeSummary
    where
        I: IntoIterator<Item = Draft>,
    {
        let mut summary = MergeSummary::default();
        for Draft { job, stamp } in drafts {
            let stamp = stamp.or(default_stamp);
            match self.entries.get_mut(&job.id) {
                Some(entry) => {
                    let merged = entry.job.union(&job);
                    if merged != entry.job {
                        entry.job = merged;
                        entry.changed_at = stamp.or(entry.changed_at);
                        summary.updated += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                None => {
                    self.entries.insert(
                        job.id.clone(),
                        Entry {
                            job,
                            changed_at: stamp,
                        },
                    );
                    summary.inserted += 1;
                }
            }
        }
        summary
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.entries.get(id).map(|entry| &entry.job)
    }

    pub fn entry(&self, id: &JobId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in id order, with their stamps.
    pub fn iter(&self) -> impl Iterator<Item = (&Job, Option<Stamp>)> {
        self.entries.values().map(|entry| (&entry.job, entry.changed_at))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.entries.values().map(|entry| &entry.job)
    }

    pub fn into_jobs(self) -> impl Iterator<Item = Job> {
        self.entries.into_values().map(|entry| entry.job)
    }

    pub fn ids(&self) -> BTreeSet<JobId> {
        self.entries.keys().cloned().collect()
    }

    /// Sub-table of the entries matching `predicate`. Each entry keeps its
    /// own stamp.
    pub fn filter<F>(&self, predicate: F) -> JobTable
    where
        F: Fn(&Job) -> bool,
    {
        JobTable {
            entries: self
                .entries
                .iter()
                .filter(|(_, entry)| predicate(&entry.job))
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect(),
        }
    }

    /// Entries stamped strictly after `since`. Unstamped entries never match.
    pub fn changed_since(&self, since: Stamp) -> Vec<(Job, Stamp)> {
        self.entries
            .values()
            .filter_map(|entry| match entry.changed_at {
                Some(stamp) if stamp > since => Some((entry.job.clone(), stamp)),
                _ => None,
            })
            .collect()
    }
}
