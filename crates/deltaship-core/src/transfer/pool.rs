use super::job::TransferJob;

/// Drain `jobs` through `concurrency` workers.
///
/// The queue is filled up front; each worker takes one job, runs it to a final
/// state (including its whole retry loop) and only then takes the next. Jobs
/// come back in their original order.
pub(super) fn run_worker_pool<F>(jobs: Vec<TransferJob>, concurrency: usize, work: F) -> Vec<TransferJob>
where
    F: Fn(&mut TransferJob) + Sync,
{
    let total = jobs.len();
    if total == 0 {
        return jobs;
    }
    let workers = concurrency.clamp(1, total);

    let (work_tx, work_rx) = crossbeam_channel::bounded::<(usize, TransferJob)>(total);
    let (result_tx, result_rx) = crossbeam_channel::bounded::<(usize, TransferJob)>(total);
    for (idx, job) in jobs.into_iter().enumerate() {
        // Capacity equals the job count, so this never blocks or fails.
        let _ = work_tx.send((idx, job));
    }
    drop(work_tx);

    let work = &work;
    std::thread::scope(|s| {
        for worker_id in 0..workers {
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            s.spawn(move || {
                for (idx, mut job) in rx {
                    tracing::debug!("worker {worker_id}: {}", job.remote_path);
                    work(&mut job);
                    if tx.send((idx, job)).is_err() {
                        return;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Option<TransferJob>> = (0..total).map(|_| None).collect();
    for (idx, job) in result_rx.try_iter() {
        slots[idx] = Some(job);
    }
    slots.into_iter().flatten().collect()
}
