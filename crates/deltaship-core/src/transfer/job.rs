use std::path::PathBuf;

use serde::Serialize;

use crate::error::DeltashipError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    InFlight,
    Retrying,
    RateLimitedWait,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    RetriesExhausted,
    RateLimitExceeded,
    Unrecoverable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&DeltashipError> for JobFailure {
    fn from(err: &DeltashipError) -> Self {
        let kind = match err {
            DeltashipError::TransferFailed { .. } => FailureKind::RetriesExhausted,
            DeltashipError::RateLimitExceeded { .. } | DeltashipError::RateLimitWaitsExhausted { .. } => {
                FailureKind::RateLimitExceeded
            }
            _ => FailureKind::Unrecoverable,
        };
        JobFailure {
            kind,
            message: err.to_string(),
        }
    }
}

/// One whole-file transfer between a remote key and a local path.
#[derive(Debug, Clone, Serialize)]
pub struct TransferJob {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub expected_size: Option<u64>,
    pub expected_hash: Option<String>,
    pub state: JobState,
    pub attempts: u32,
    /// Set when the destination already held the item and nothing was sent.
    pub skipped: bool,
    pub failure: Option<JobFailure>,
}

impl TransferJob {
    pub fn new(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            expected_size: None,
            expected_hash: None,
            state: JobState::Pending,
            attempts: 0,
            skipped: false,
            failure: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn is_failed(&self) -> bool {
        self.state == JobState::Failed
    }

    pub(crate) fn mark_skipped(&mut self) {
        self.state = JobState::Done;
        self.skipped = true;
    }

    pub(crate) fn finish(&mut self, attempts: u32, outcome: Result<(), &DeltashipError>) {
        self.attempts = attempts;
        match outcome {
            Ok(()) => {
                self.state = JobState::Done;
                self.failure = None;
            }
            Err(e) => {
                self.state = JobState::Failed;
                self.failure = Some(JobFailure::from(e));
            }
        }
    }
}
