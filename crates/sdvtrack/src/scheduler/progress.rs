use crate::broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
use crate::model::UploadJob;

pub trait ProgressReporter: Send + Sync {
    fn report(&self, phase: JobPhase, job: &UploadJob);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _phase: JobPhase, _job: &UploadJob) {}
}

/// Bridges runner events to the broadcast channel.
#[derive(Clone)]
pub struct BroadcastProgress {
    broadcaster: JobProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: JobProgressBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, phase: JobPhase, job: &UploadJob) {
        self.broadcaster
            .send(JobProgressEvent::new(phase, job.snapshot()));
    }
}
