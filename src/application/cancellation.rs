use crate::domain::job::JobId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Cancellation tokens of the jobs currently executing.
///
/// A token exists only between [`register`](Self::register) at the start of
/// a run and [`unregister`](Self::unregister) (or a successful
/// [`signal`](Self::signal)). At most one run holds the token of a job, and
/// only that run unregisters it. All access goes through one lock.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the token for a run that is starting. `None` when another
    /// run already holds the job.
    pub fn register(&self, job_id: JobId) -> Option<CancellationToken> {
        match self.tokens().entry(job_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => Some(slot.insert(CancellationToken::new()).clone()),
        }
    }

    /// Fires and removes the token. `false` when the job is not running,
    /// including when it was already signalled.
    pub fn signal(&self, job_id: JobId) -> bool {
        match self.tokens().remove(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the token without firing it. Once this returns, later
    /// signals for the job report "not found".
    pub fn unregister(&self, job_id: JobId) -> Option<CancellationToken> {
        self.tokens().remove(&job_id)
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.tokens().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().is_empty()
    }
}
