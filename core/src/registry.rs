//! Job Registry (SPEC_FULL §4.G): the live in-memory job map plus a
//! durable mirror for crash recovery and history listing. Grounded on the
//! teacher's `ACTIVE_JOBS`/`JOB_STATES` statics, reworked as an explicit
//! value per SPEC_FULL §9 ("global singletons -> explicit construction"):
//! no process-global mutable state.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::jobs::{Job, JobSnapshot, JobStatus};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("durable job store error: {0}")]
    Store(String),
}

/// Durable mirror of job snapshots, authoritative for historical jobs.
pub trait JobStore: Send + Sync {
    fn save(&self, snapshot: &JobSnapshot) -> Result<(), RegistryError>;
    fn load(&self, job_id: &str) -> Option<JobSnapshot>;
    fn list(&self) -> Vec<JobSnapshot>;
    fn delete(&self, job_id: &str) -> Result<(), RegistryError>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    snapshots: Mutex<HashMap<String, JobSnapshot>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn save(&self, snapshot: &JobSnapshot) -> Result<(), RegistryError> {
        self.snapshots
            .lock()
            .expect("job store poisoned")
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, job_id: &str) -> Option<JobSnapshot> {
        self.snapshots
            .lock()
            .expect("job store poisoned")
            .get(job_id)
            .cloned()
    }

    fn list(&self) -> Vec<JobSnapshot> {
        self.snapshots
            .lock()
            .expect("job store poisoned")
            .values()
            .cloned()
            .collect()
    }

    fn delete(&self, job_id: &str) -> Result<(), RegistryError> {
        self.snapshots.lock().expect("job store poisoned").remove(job_id);
        Ok(())
    }
}

/// Process-wide keyed store from job id to the live `Job`, backed by a
/// durable mirror. The Job Runner exclusively mutates a live job through the
/// `Arc<tokio::sync::Mutex<Job>>` handle; every other reader goes through
/// `get`/`list` and sees a snapshot copy.
pub struct JobRegistry {
    live: Mutex<HashMap<String, Arc<AsyncMutex<Job>>>>,
    store: Box<dyn JobStore>,
}

impl JobRegistry {
    pub fn new(store: Box<dyn JobStore>) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub async fn put(&self, job: Arc<AsyncMutex<Job>>) {
        let id = job.lock().await.id.clone();
        self.live.lock().expect("registry poisoned").insert(id, job);
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<AsyncMutex<Job>>> {
        self.live.lock().expect("registry poisoned").get(job_id).cloned()
    }

    pub fn pop(&self, job_id: &str) -> Option<Arc<AsyncMutex<Job>>> {
        self.live.lock().expect("registry poisoned").remove(job_id)
    }

    pub async fn persist(&self, job_id: &str) -> Result<(), RegistryError> {
        if let Some(job) = self.get(job_id) {
            let snapshot = job.lock().await.snapshot();
            self.store.save(&snapshot)?;
        }
        Ok(())
    }

    /// Merge the durable mirror (authoritative for historical jobs) with
    /// the live map (authoritative for in-flight state), optionally
    /// filtered by owner.
    pub async fn list(&self, owner: Option<&str>) -> Vec<JobSnapshot> {
        let mut merged: HashMap<String, JobSnapshot> = self
            .store
            .list()
            .into_iter()
            .map(|snapshot| (snapshot.id.clone(), snapshot))
            .collect();

        let live_jobs: Vec<Arc<AsyncMutex<Job>>> = self
            .live
            .lock()
            .expect("registry poisoned")
            .values()
            .cloned()
            .collect();
        for job in live_jobs {
            let snapshot = job.lock().await.snapshot();
            merged.insert(snapshot.id.clone(), snapshot);
        }

        let mut jobs: Vec<JobSnapshot> = merged.into_values().collect();
        if let Some(owner) = owner {
            jobs.retain(|job| job.owner == owner);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn count_running(&self) -> usize {
        let live_jobs: Vec<Arc<AsyncMutex<Job>>> = self
            .live
            .lock()
            .expect("registry poisoned")
            .values()
            .cloned()
            .collect();
        let mut count = 0;
        for job in live_jobs {
            if job.lock().await.status == JobStatus::Running {
                count += 1;
            }
        }
        count
    }

    /// Delete terminal jobs older than `max_age_hours`, removing their
    /// on-disk artifacts. Quota accounting adjustments are the caller's
    /// responsibility (external to this component).
    pub fn cleanup_old(&self, max_age_hours: u64) -> Vec<String> {
        let cutoff = SystemTime::now() - Duration::from_secs(max_age_hours * 3600);
        let cutoff: chrono::DateTime<Utc> = cutoff.into();

        let mut removed = Vec::new();
        for snapshot in self.store.list() {
            if !snapshot.status.is_terminal() {
                continue;
            }
            let Some(finished_at) = snapshot.finished_at else {
                continue;
            };
            if finished_at > cutoff {
                continue;
            }

            for artifact in [&snapshot.primary_artifact, &snapshot.secondary_artifact] {
                if let Some(path) = artifact {
                    let _ = fs::remove_file(path);
                }
            }
            let _ = self.store.delete(&snapshot.id);
            self.live.lock().expect("registry poisoned").remove(&snapshot.id);
            removed.push(snapshot.id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Job;
    use std::path::PathBuf;

    fn make_job(id: &str, owner: &str) -> Arc<AsyncMutex<Job>> {
        Arc::new(AsyncMutex::new(Job::new(
            id.to_string(),
            owner.to_string(),
            PathBuf::from("/tmp/src"),
            PathBuf::from("/tmp/out"),
            std::time::Duration::from_millis(200),
        )))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let registry = JobRegistry::new(Box::new(InMemoryJobStore::new()));
        registry.put(make_job("aaaaaaaa", "alice")).await;
        assert!(registry.get("aaaaaaaa").is_some());
        assert!(registry.get("bbbbbbbb").is_none());
    }

    #[tokio::test]
    async fn list_merges_live_and_durable_and_filters_by_owner() {
        let registry = JobRegistry::new(Box::new(InMemoryJobStore::new()));
        registry.put(make_job("aaaaaaaa", "alice")).await;
        registry.put(make_job("bbbbbbbb", "bob")).await;
        registry.persist("aaaaaaaa").await.unwrap();
        registry.persist("bbbbbbbb").await.unwrap();

        let alice_jobs = registry.list(Some("alice")).await;
        assert_eq!(alice_jobs.len(), 1);
        assert_eq!(alice_jobs[0].id, "aaaaaaaa");

        assert_eq!(registry.list(None).await.len(), 2);
    }

    #[tokio::test]
    async fn pop_removes_from_live_map() {
        let registry = JobRegistry::new(Box::new(InMemoryJobStore::new()));
        registry.put(make_job("aaaaaaaa", "alice")).await;
        assert!(registry.pop("aaaaaaaa").is_some());
        assert!(registry.get("aaaaaaaa").is_none());
    }
}
