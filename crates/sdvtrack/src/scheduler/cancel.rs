use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-job cooperative cancel flags, shared by the scheduler and workers.
///
/// Workers check their flag only between chunks.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    flags: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Cancel registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The flag for `job_id`, created unset on first use.
    pub fn flag(&self, job_id: &str) -> Arc<AtomicBool> {
        Arc::clone(
            self.lock()
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    /// Raises the flag for `job_id`.
    pub fn request(&self, job_id: &str) {
        self.flag(job_id).store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self, job_id: &str) -> bool {
        self.lock()
            .get(job_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Forgets `job_id` once its worker is done with it.
    pub fn remove(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
