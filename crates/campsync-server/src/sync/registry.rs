//! Job name to implementation map

use std::collections::BTreeMap;
use std::sync::Arc;

use super::job::SyncJob;

/// Registered jobs, keyed by [`SyncJob::name`]
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<dyn SyncJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, returning any job previously held under the same name.
    pub fn register(&mut self, job: Arc<dyn SyncJob>) -> Option<Arc<dyn SyncJob>> {
        self.jobs.insert(job.name().to_string(), job)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SyncJob>> {
        self.jobs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn SyncJob>> {
        self.jobs.remove(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry").field("jobs", &self.names()).finish()
    }
}
