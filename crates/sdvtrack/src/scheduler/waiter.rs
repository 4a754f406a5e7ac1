//! Waiting for a job to reach a terminal state.
//!
//! Callers depend on [`CompletionWaiter`] and never on the transport: the
//! same contract is served by polling the job row or by listening to the
//! progress broadcast.

use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::JobProgressBroadcaster;
use crate::db::{job_repo, Database};
use crate::error::SchedulerError;
use crate::model::JobSnapshot;

pub trait CompletionWaiter: Send + Sync {
    /// Blocks until `job_id` is terminal or `timeout` elapses.
    fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobSnapshot, SchedulerError>;
}

fn snapshot(db: &Database, job_id: &str) -> Result<JobSnapshot, SchedulerError> {
    db.with_conn(|conn| job_repo::find_by_id(conn, job_id))?
        .map(|job| job.snapshot())
        .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
}

fn timed_out(job_id: &str, waited: Duration) -> SchedulerError {
    SchedulerError::WaitTimeout {
        job_id: job_id.to_string(),
        waited,
    }
}

/// Polls the job row with exponential backoff.
#[derive(Clone)]
pub struct PollingWaiter {
    db: Database,
    initial_delay: Duration,
    max_delay: Duration,
}

impl PollingWaiter {
    pub fn new(db: Database) -> Self {
        Self::with_backoff(db, Duration::from_millis(50), Duration::from_secs(2))
    }

    pub fn with_backoff(db: Database, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            db,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }
}

impl CompletionWaiter for PollingWaiter {
    fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobSnapshot, SchedulerError> {
        let started = Instant::now();
        let mut delay = self.initial_delay;

        loop {
            let current = snapshot(&self.db, job_id)?;
            if current.is_terminal() {
                return Ok(current);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(timed_out(job_id, elapsed));
            }
            std::thread::sleep(delay.min(timeout - elapsed));
            delay = (delay * 2).min(self.max_delay);
        }
    }
}

/// Listens for the job's terminal progress event.
///
/// The wait drives its own single-threaded runtime. Called from inside a
/// tokio runtime, it listens on a separate thread and blocks the caller
/// until that thread returns.
#[derive(Clone)]
pub struct BroadcastWaiter {
    db: Database,
    broadcaster: JobProgressBroadcaster,
}

impl BroadcastWaiter {
    pub fn new(db: Database, broadcaster: JobProgressBroadcaster) -> Self {
        Self { db, broadcaster }
    }
}

impl CompletionWaiter for BroadcastWaiter {
    fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobSnapshot, SchedulerError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.listen(job_id, timeout);
        }
        // block_on panics on a thread that already runs a runtime.
        std::thread::scope(|scope| {
            scope
                .spawn(|| self.listen(job_id, timeout))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })
    }
}

impl BroadcastWaiter {
    fn listen(&self, job_id: &str, timeout: Duration) -> Result<JobSnapshot, SchedulerError> {
        // Subscribe before reading the row so a transition in between is
        // still observed.
        let mut rx = self.broadcaster.subscribe();
        let current = snapshot(&self.db, job_id)?;
        if current.is_terminal() {
            return Ok(current);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(SchedulerError::Runtime)?;

        let listen = async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.job_id == job_id && event.is_terminal() => {
                        return Ok(event.snapshot);
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("Waiter for {} lagged by {} events", job_id, skipped);
                        match snapshot(&self.db, job_id) {
                            Ok(current) if current.is_terminal() => return Ok(current),
                            Ok(_) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Err(RecvError::Closed) => return Err(SchedulerError::ChannelClosed),
                }
            }
        };

        runtime.block_on(async {
            tokio::time::timeout(timeout, listen)
                .await
                .unwrap_or_else(|_| Err(timed_out(job_id, timeout)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broadcast::{JobPhase, JobProgressEvent};
    use crate::db::job_repo::tests::sample_job;
    use crate::model::JobStatus;

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let job = sample_job("job-1", "upload-1");
        db.with_conn(|conn| job_repo::insert(conn, &job)).unwrap();
        (db, job.id)
    }

    fn finish_later(db: Database, job_id: String, after: Duration) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            std::thread::sleep(after);
            db.with_conn(|conn| {
                job_repo::transition(conn, &job_id, JobStatus::Processing, None)?;
                job_repo::transition(conn, &job_id, JobStatus::Completed, None)
            })
            .unwrap();
        })
    }

    #[test]
    fn test_polling_waiter_sees_completion() {
        let (db, job_id) = setup();
        let handle = finish_later(db.clone(), job_id.clone(), Duration::from_millis(50));

        let waiter = PollingWaiter::with_backoff(
            db,
            Duration::from_millis(5),
            Duration::from_millis(20),
        );
        let done = waiter.wait(&job_id, Duration::from_secs(10)).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        handle.join().unwrap();
    }

    #[test]
    fn test_polling_waiter_times_out() {
        let (db, job_id) = setup();
        let waiter = PollingWaiter::with_backoff(
            db,
            Duration::from_millis(5),
            Duration::from_millis(10),
        );
        assert!(matches!(
            waiter.wait(&job_id, Duration::from_millis(40)),
            Err(SchedulerError::WaitTimeout { .. })
        ));
    }

    #[test]
    fn test_waiters_report_unknown_jobs() {
        let db = Database::open_in_memory().unwrap();
        let polling = PollingWaiter::new(db.clone());
        let push = BroadcastWaiter::new(db, JobProgressBroadcaster::new(4));
        assert!(matches!(
            polling.wait("missing", Duration::from_millis(10)),
            Err(SchedulerError::JobNotFound(_))
        ));
        assert!(matches!(
            push.wait("missing", Duration::from_millis(10)),
            Err(SchedulerError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_broadcast_waiter_receives_terminal_event() {
        let (db, job_id) = setup();
        let broadcaster = JobProgressBroadcaster::new(16);
        let waiter = Arc::new(BroadcastWaiter::new(db.clone(), broadcaster.clone()));

        let handle = {
            let waiter = Arc::clone(&waiter);
            let job_id = job_id.clone();
            std::thread::spawn(move || waiter.wait(&job_id, Duration::from_secs(10)))
        };

        // Keep publishing until the waiter has subscribed and picked it up.
        let mut job = db
            .with_conn(|conn| job_repo::find_by_id(conn, &job_id))
            .unwrap()
            .unwrap();
        job.status = JobStatus::Completed;
        while !handle.is_finished() {
            broadcaster.send(JobProgressEvent::new(
                JobPhase::ChunkCommitted,
                sample_job("other", "upload-2").snapshot(),
            ));
            broadcaster.send(JobProgressEvent::new(JobPhase::Finished, job.snapshot()));
            std::thread::sleep(Duration::from_millis(5));
        }

        let done = handle.join().unwrap().unwrap();
        assert_eq!(done.id, job_id);
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[test]
    fn test_broadcast_waiter_returns_already_terminal_job() {
        let (db, job_id) = setup();
        finish_later(db.clone(), job_id.clone(), Duration::ZERO)
            .join()
            .unwrap();
        let waiter = BroadcastWaiter::new(db, JobProgressBroadcaster::new(4));
        let done = waiter.wait(&job_id, Duration::from_millis(10)).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_broadcast_waiter_works_inside_a_runtime() {
        let (db, job_id) = setup();
        let broadcaster = JobProgressBroadcaster::new(4);
        let waiter = BroadcastWaiter::new(db.clone(), broadcaster.clone());
        assert!(matches!(
            waiter.wait(&job_id, Duration::from_millis(30)),
            Err(SchedulerError::WaitTimeout { .. })
        ));

        let mut job = db
            .with_conn(|conn| job_repo::find_by_id(conn, &job_id))
            .unwrap()
            .unwrap();
        job.status = JobStatus::Completed;
        let publisher = std::thread::spawn(move || {
            for _ in 0..200 {
                broadcaster.send(JobProgressEvent::new(JobPhase::Finished, job.snapshot()));
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        let done = waiter.wait(&job_id, Duration::from_secs(10)).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        publisher.join().unwrap();
    }

    #[test]
    fn test_broadcast_waiter_times_out() {
        let (db, job_id) = setup();
        let waiter = BroadcastWaiter::new(db, JobProgressBroadcaster::new(4));
        assert!(matches!(
            waiter.wait(&job_id, Duration::from_millis(30)),
            Err(SchedulerError::WaitTimeout { .. })
        ));
    }
}
