use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::SchedulerError;
use crate::scheduler::progress::ProgressReporter;
use crate::scheduler::runner::{JobRunner, RunOutcome};

/// Fixed set of worker threads pulling job ids off a shared queue.
pub struct WorkerPool {
    job_sender: Sender<String>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one).
    pub fn new(
        runner: Arc<JobRunner>,
        progress: Arc<dyn ProgressReporter>,
        worker_count: usize,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<String>(worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let runner = Arc::clone(&runner);
            let progress = Arc::clone(&progress);

            let spawned = thread::Builder::new()
                .name(format!("sdvtrack-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, shutdown_flag, runner, progress);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Started {} workers", workers.len());

        Self {
            job_sender,
            workers,
            shutdown,
        }
    }

    /// Queues a job for processing. Blocks while the queue is full.
    pub fn submit(&self, job_id: String) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Relaxed) || self.workers.is_empty() {
            return Err(SchedulerError::ChannelClosed);
        }

        self.job_sender
            .send(job_id)
            .map_err(|_| SchedulerError::ChannelClosed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting jobs. Workers finish their current job and exit.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<String>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<JobRunner>,
    progress: Arc<dyn ProgressReporter>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job_id) => {
                debug!("Worker {} processing job {}", worker_id, job_id);
                match runner.run(&job_id, progress.as_ref()) {
                    Ok(RunOutcome::Failed(message)) => {
                        debug!("Worker {}: job {} failed: {}", worker_id, job_id, message)
                    }
                    Ok(outcome) => debug!("Worker {}: job {} {:?}", worker_id, job_id, outcome),
                    Err(e) => error!("Worker {} could not run job {}: {}", worker_id, job_id, e),
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo;
    use crate::model::{FileRole, JobStatus};
    use crate::scheduler::progress::NoopProgress;
    use crate::scheduler::runner::tests::{fixture, primary_csv, stage, stage_for};

    fn wait_for_terminal(db: &crate::db::Database, job_id: &str) -> JobStatus {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = db
                .with_conn(|conn| job_repo::find_by_id(conn, job_id))
                .unwrap()
                .unwrap();
            if job.status.is_terminal() {
                return job.status;
            }
            assert!(std::time::Instant::now() < deadline, "job never finished");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_pool_runs_jobs_for_different_companies() {
        let fx = fixture();
        let a = stage(&fx, "p1", FileRole::Primary, &primary_csv(3), None);
        let b = stage_for(&fx, "globex", "p2", FileRole::Primary, &primary_csv(2), None);
        let db = fx.db.clone();

        let pool = WorkerPool::new(Arc::new(fx.runner), Arc::new(NoopProgress), 2);
        assert_eq!(pool.worker_count(), 2);
        pool.submit(a.id.clone()).unwrap();
        pool.submit(b.id.clone()).unwrap();

        assert_eq!(wait_for_terminal(&db, &a.id), JobStatus::Completed);
        assert_eq!(wait_for_terminal(&db, &b.id), JobStatus::Completed);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let fx = fixture();
        let pool = WorkerPool::new(Arc::new(fx.runner), Arc::new(NoopProgress), 1);
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.submit("job-x".to_string()),
            Err(SchedulerError::ChannelClosed)
        ));
        pool.wait();
    }
}
