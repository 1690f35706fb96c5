//! Resilient parallel movement of whole files between local disk and a
//! [`RemoteStore`].

pub mod job;
pub mod rate_limit;
pub mod retry;

mod batch;
mod pool;

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use deltaship_storage::{BulkItem, RemoteStore};
use deltaship_types::content_hash::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::{DeltashipError, Result};

pub use job::{FailureKind, JobFailure, JobState, TransferJob};
pub use rate_limit::RateLimitPolicy;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper, backoff_delay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Bulk first, per-item on any non-rate-limit bulk failure.
    #[default]
    Auto,
    /// One store call for the whole job set.
    Bulk,
    /// Bounded worker pool, one job per worker at a time.
    PerItem,
}

impl FromStr for Strategy {
    type Err = DeltashipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Strategy::Auto),
            "bulk" => Ok(Strategy::Bulk),
            "per-item" | "per_item" | "peritem" => Ok(Strategy::PerItem),
            other => Err(DeltashipError::Config(format!(
                "unknown transfer strategy '{other}' (expected auto, bulk, per-item)"
            ))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Auto => "auto",
            Strategy::Bulk => "bulk",
            Strategy::PerItem => "per-item",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Fetch,
    Push,
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub strategy: Strategy,
    pub concurrency: usize,
    /// Total attempts per job, counting the first.
    pub retries: u32,
    pub rate_limit: RateLimitPolicy,
    /// Treat items already present at the destination as done.
    pub skip_existing: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Auto,
            concurrency: 4,
            retries: 4,
            rate_limit: RateLimitPolicy::default(),
            skip_existing: true,
        }
    }
}

/// A completed transfer whose bytes do not hash to the expected value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityMismatch {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

impl From<&IntegrityMismatch> for DeltashipError {
    fn from(m: &IntegrityMismatch) -> Self {
        DeltashipError::IntegrityMismatch {
            path: m.path.clone(),
            expected: m.expected.clone(),
            actual: m.actual.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub direction: Direction,
    /// Strategy that actually moved the bytes.
    pub strategy: Strategy,
    pub jobs: Vec<TransferJob>,
    pub integrity_mismatches: Vec<IntegrityMismatch>,
}

impl TransferReport {
    pub fn transferred(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_done() && !j.skipped).count()
    }

    pub fn skipped(&self) -> usize {
        self.jobs.iter().filter(|j| j.skipped).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_failed()).count()
    }

    /// Every job reached `Done`. Integrity mismatches do not count against this.
    pub fn is_complete(&self) -> bool {
        self.jobs.iter().all(|j| j.is_done())
    }

    pub fn total_attempts(&self) -> u32 {
        self.jobs.iter().map(|j| j.attempts).sum()
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &TransferJob> {
        self.jobs.iter().filter(|j| j.is_failed())
    }
}

/// Moves job sets between local disk and a remote store.
pub struct TransferEngine<'a> {
    store: &'a dyn RemoteStore,
    options: TransferOptions,
    sleeper: &'a dyn Sleeper,
}

impl<'a> TransferEngine<'a> {
    pub fn new(store: &'a dyn RemoteStore, options: TransferOptions) -> Self {
        Self {
            store,
            options,
            sleeper: &retry::THREAD_SLEEPER,
        }
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    fn policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, self.options.rate_limit.clone())
    }

    /// Download every job's remote key to its local path.
    pub fn fetch(&self, jobs: Vec<TransferJob>) -> TransferReport {
        self.run(Direction::Fetch, jobs)
    }

    /// Upload every job's local file to its remote key.
    pub fn push(&self, jobs: Vec<TransferJob>) -> TransferReport {
        self.run(Direction::Push, jobs)
    }

    /// Upload `data` to `key` under the retry policy, replacing any existing
    /// object. Used for files that change in place, such as a latest alias.
    pub fn put_replacing(&self, key: &str, data: &[u8]) -> Result<u32> {
        let mut attempts = 0;
        self.policy(self.options.retries).run(
            key,
            self.sleeper,
            |_, attempt| attempts = attempt,
            || self.store.put(key, data),
        )?;
        Ok(attempts)
    }

    fn run(&self, direction: Direction, mut jobs: Vec<TransferJob>) -> TransferReport {
        self.mark_existing(direction, &mut jobs);

        let pending: Vec<usize> = (0..jobs.len()).filter(|&i| !jobs[i].is_done()).collect();
        if pending.is_empty() {
            tracing::info!("{direction:?}: nothing to transfer ({} already present)", jobs.len());
            return TransferReport {
                direction,
                strategy: self.options.strategy,
                jobs,
                integrity_mismatches: Vec::new(),
            };
        }

        let strategy = match self.options.strategy {
            Strategy::Bulk => {
                if let Err(e) = self.run_bulk(direction, &mut jobs, &pending, self.options.retries) {
                    tracing::warn!("bulk {direction:?} failed: {e}");
                }
                Strategy::Bulk
            }
            Strategy::PerItem => {
                jobs = self.run_per_item(direction, jobs);
                Strategy::PerItem
            }
            Strategy::Auto => {
                let fallback = match self.run_bulk(direction, &mut jobs, &pending, 1) {
                    Ok(()) => false,
                    Err(
                        DeltashipError::RateLimitExceeded { .. } | DeltashipError::RateLimitWaitsExhausted { .. },
                    ) => false,
                    Err(e) => {
                        tracing::info!("bulk {direction:?} failed ({e}); falling back to per-item");
                        true
                    }
                };
                if fallback {
                    for &i in &pending {
                        let job = &mut jobs[i];
                        job.state = JobState::Pending;
                        job.failure = None;
                    }
                    jobs = self.run_per_item(direction, jobs);
                    Strategy::PerItem
                } else {
                    Strategy::Bulk
                }
            }
        };

        let integrity_mismatches = self.verify(&jobs);
        TransferReport {
            direction,
            strategy,
            jobs,
            integrity_mismatches,
        }
    }

    /// Mark jobs whose destination already holds the same content. A key
    /// that exists with different bytes is sent again.
    fn mark_existing(&self, direction: Direction, jobs: &mut [TransferJob]) {
        if !self.options.skip_existing {
            return;
        }
        for job in jobs.iter_mut() {
            let present = match direction {
                Direction::Push => match remote_copy_matches(self.store, job) {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::debug!("content check for {} failed: {e}", job.remote_path);
                        false
                    }
                },
                Direction::Fetch => local_copy_matches(job),
            };
            if present {
                tracing::debug!("{} already present, skipping", job.remote_path);
                job.mark_skipped();
            }
        }
    }

    fn run_bulk(
        &self,
        direction: Direction,
        jobs: &mut [TransferJob],
        pending: &[usize],
        max_attempts: u32,
    ) -> Result<()> {
        let label = format!("bulk {direction:?} ({} items)", pending.len()).to_lowercase();
        let mut attempts = 0;
        let result = {
            let items: Vec<BulkItem<'_>> = pending
                .iter()
                .map(|&i| BulkItem {
                    remote: &jobs[i].remote_path,
                    local: &jobs[i].local_path,
                })
                .collect();
            self.policy(max_attempts).run(
                &label,
                self.sleeper,
                |_, attempt| attempts = attempt,
                || match direction {
                    Direction::Push => self.store.push_all(&items),
                    Direction::Fetch => self.store.pull_all(&items),
                },
            )
        };
        for &i in pending {
            jobs[i].finish(attempts, result.as_ref().map(|_| ()));
        }
        result
    }

    fn run_per_item(&self, direction: Direction, jobs: Vec<TransferJob>) -> Vec<TransferJob> {
        let policy = self.policy(self.options.retries);
        pool::run_worker_pool(jobs, self.options.concurrency, |job| {
            if job.is_done() {
                return;
            }
            let mut attempts = 0;
            let result = policy.run(
                &job.remote_path,
                self.sleeper,
                |_, attempt| attempts = attempt,
                || match direction {
                    Direction::Fetch => fetch_one(self.store, job),
                    Direction::Push => push_one(self.store, job),
                },
            );
            job.finish(attempts, result.as_ref().map(|_| ()));
        })
    }

    /// Recompute hashes of completed transfers with a known expected hash.
    fn verify(&self, jobs: &[TransferJob]) -> Vec<IntegrityMismatch> {
        jobs.iter()
            .filter(|j| j.is_done() && !j.skipped)
            .filter_map(|job| {
                let expected = job.expected_hash.as_deref()?;
                let actual = match ContentHash::of_file(&job.local_path) {
                    Ok(h) => h,
                    Err(e) => {
                        tracing::warn!("cannot hash {}: {e}", job.local_path.display());
                        return None;
                    }
                };
                if actual.matches(expected) {
                    return None;
                }
                tracing::warn!(
                    "integrity mismatch for {}: expected {expected}, got {actual}",
                    job.remote_path
                );
                Some(IntegrityMismatch {
                    path: job.remote_path.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                })
            })
            .collect()
    }
}

fn local_copy_matches(job: &TransferJob) -> bool {
    let Ok(meta) = fs::metadata(&job.local_path) else {
        return false;
    };
    if !meta.is_file() || job.expected_size.is_some_and(|size| size != meta.len()) {
        return false;
    }
    match job.expected_hash.as_deref() {
        Some(expected) => ContentHash::of_file(&job.local_path).is_ok_and(|h| h.matches(expected)),
        None => job.expected_size.is_some(),
    }
}

/// Size and hash default to the local file's when the job does not carry them.
fn remote_copy_matches(store: &dyn RemoteStore, job: &TransferJob) -> Result<bool> {
    let size = match job.expected_size {
        Some(size) => size,
        None => fs::metadata(&job.local_path)?.len(),
    };
    let hash = match &job.expected_hash {
        Some(hash) => hash.clone(),
        None => ContentHash::of_file(&job.local_path)?.to_string(),
    };
    store.holds(&job.remote_path, size, &hash)
}

fn fetch_one(store: &dyn RemoteStore, job: &TransferJob) -> Result<()> {
    let data = store.get(&job.remote_path)?.ok_or_else(|| {
        DeltashipError::Other(format!("{} not found on {} store", job.remote_path, store.label()))
    })?;
    if let Some(expected) = job.expected_size {
        if data.len() as u64 != expected {
            return Err(DeltashipError::Other(format!(
                "{}: expected {expected} bytes, received {}",
                job.remote_path,
                data.len()
            )));
        }
    }
    write_atomic(&job.local_path, &data)
}

fn push_one(store: &dyn RemoteStore, job: &TransferJob) -> Result<()> {
    let data = read_local(&job.local_path)?;
    store.put(&job.remote_path, &data)
}

/// Read a local file, reporting a missing file as a configuration problem
/// so it is not retried.
pub(crate) fn read_local(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            DeltashipError::Config(format!("local file '{}' is missing", path.display()))
        }
        _ => DeltashipError::Io(e),
    })
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
