//! Job sources.
//!
//! The queue transport (SQS, Redis, whatever the deployment uses) is
//! an external collaborator; workers only need "give me the next job
//! or tell me you're drained". The in-memory source backs tests and
//! the CLI's batch mode.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::job::EnhanceJob;

/// A pull-based source of enhance jobs.
///
/// `next_job` returning `None` means the source is drained and the
/// worker should shut down.
pub trait JobSource: Send + Sync {
    /// Pull the next job, or `None` when drained.
    fn next_job(&self) -> Option<EnhanceJob>;
}

/// FIFO in-memory job source.
pub struct InMemorySource {
    jobs: Mutex<VecDeque<EnhanceJob>>,
}

impl InMemorySource {
    /// Wrap a batch of jobs.
    #[must_use]
    pub fn new(jobs: impl IntoIterator<Item = EnhanceJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into_iter().collect()),
        }
    }

    /// Remaining job count.
    ///
    /// # Panics
    ///
    /// Panics if the queue lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Whether the source is drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobSource for InMemorySource {
    #[allow(clippy::unwrap_used)]
    fn next_job(&self) -> Option<EnhanceJob> {
        self.jobs.lock().unwrap().pop_front()
    }
}
