//! At-most-one-in-flight protection for scheduled jobs.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A one-permit gate. A job that cannot take the permit immediately is
/// already running and should skip this trigger.
#[derive(Clone)]
pub struct JobGuard {
    name: &'static str,
    permit: Arc<Semaphore>,
}

impl JobGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the permit if free. Dropping the returned permit releases it.
    pub fn try_start(&self) -> Option<OwnedSemaphorePermit> {
        self.permit.clone().try_acquire_owned().ok()
    }
}
