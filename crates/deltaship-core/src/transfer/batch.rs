use deltaship_storage::CommitFile;

use super::{Direction, Strategy, TransferEngine, TransferJob, TransferReport, read_local};
use crate::error::Result;

impl TransferEngine<'_> {
    /// Push jobs as atomic multi-file commits of up to `batch_size` files.
    ///
    /// Retry and rate-limit policy apply per commit. A commit that hits an
    /// unrecoverable rate limit fails all of its files at once; files are
    /// never retried individually.
    pub fn push_batched(
        &self,
        mut jobs: Vec<TransferJob>,
        batch_size: usize,
        message: &str,
    ) -> TransferReport {
        self.mark_existing(Direction::Push, &mut jobs);

        let pending: Vec<usize> = (0..jobs.len()).filter(|&i| !jobs[i].is_done()).collect();
        let batches: Vec<&[usize]> = pending.chunks(batch_size.max(1)).collect();
        let count = batches.len();
        let policy = self.policy(self.options.retries);

        for (n, batch) in batches.iter().enumerate() {
            let label = format!("commit {}/{count} ({} files)", n + 1, batch.len());
            let commit_message = format!("{message} ({}/{count})", n + 1);
            let mut attempts = 0;
            let result = policy.run(
                &label,
                self.sleeper,
                |_, attempt| attempts = attempt,
                || {
                    let files = load_batch(&jobs, batch)?;
                    self.store.commit(&files, &commit_message)
                },
            );
            match &result {
                Ok(()) => tracing::info!("{label}: committed"),
                Err(e) => tracing::warn!("{label}: failed: {e}"),
            }
            for &i in batch.iter() {
                jobs[i].finish(attempts, result.as_ref().map(|_| ()));
            }
        }

        let integrity_mismatches = self.verify(&jobs);
        TransferReport {
            direction: Direction::Push,
            strategy: Strategy::Bulk,
            jobs,
            integrity_mismatches,
        }
    }
}

fn load_batch(jobs: &[TransferJob], batch: &[usize]) -> Result<Vec<CommitFile>> {
    batch
        .iter()
        .map(|&i| {
            let job = &jobs[i];
            Ok(CommitFile {
                path: job.remote_path.clone(),
                data: read_local(&job.local_path)?,
            })
        })
        .collect()
}
