//! Job data model and Job Runner (SPEC_FULL §3, §4.F). Grounded on the
//! teacher's `jobs.rs` checkpoint/progress shapes, rewritten around an
//! explicitly-constructed `Job` rather than the teacher's
//! `ACTIVE_JOBS`/`JOB_STATES` global statics (SPEC_FULL §9).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Semaphore};

use crate::archive;
use crate::chain::ProviderChain;
use crate::validator::{self, ValidationReport};
use crate::worker;

const MAX_RETAINED_ERRORS: usize = 10;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Live job state, mutated in place by the runner behind an
/// `Arc<Mutex<Job>>` held by the registry.
pub struct Job {
    pub id: String,
    pub owner: String,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub inter_call_delay: Duration,
    pub status: JobStatus,
    pub total_files: usize,
    pub files_done: usize,
    pub total_strings: usize,
    pub translated_strings: usize,
    pub current_file: Option<String>,
    pub errors: VecDeque<String>,
    pub validation_report: Option<ValidationReport>,
    pub primary_artifact: Option<PathBuf>,
    pub secondary_artifact: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel: Arc<AtomicBool>,
}

impl Job {
    pub fn new(
        id: String,
        owner: String,
        source_dir: PathBuf,
        output_dir: PathBuf,
        inter_call_delay: Duration,
    ) -> Self {
        Self {
            id,
            owner,
            source_dir,
            output_dir,
            inter_call_delay,
            status: JobStatus::Pending,
            total_files: 0,
            files_done: 0,
            total_strings: 0,
            translated_strings: 0,
            current_file: None,
            errors: VecDeque::new(),
            validation_report: None,
            primary_artifact: None,
            secondary_artifact: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push_error(&mut self, message: String) {
        warn!("job {}: {message}", self.id);
        if self.errors.len() >= MAX_RETAINED_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(message);
    }

    pub fn percent(&self) -> f64 {
        if self.total_strings == 0 {
            return 0.0;
        }
        let ratio = self.translated_strings as f64 / self.total_strings as f64;
        (ratio * 100.0).clamp(0.0, 100.0)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            owner: self.owner.clone(),
            status: self.status,
            total_files: self.total_files,
            files_done: self.files_done,
            total_strings: self.total_strings,
            translated_strings: self.translated_strings,
            percent: self.percent(),
            current_file: self.current_file.clone(),
            errors: self.errors.iter().cloned().collect(),
            validation_report: self.validation_report.clone(),
            primary_artifact: self.primary_artifact.clone(),
            secondary_artifact: self.secondary_artifact.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Serializable mirror of [`Job`], published over the progress channel and
/// persisted by the registry's durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub owner: String,
    pub status: JobStatus,
    pub total_files: usize,
    pub files_done: usize,
    pub total_strings: usize,
    pub translated_strings: usize,
    pub percent: f64,
    pub current_file: Option<String>,
    pub errors: Vec<String>,
    pub validation_report: Option<ValidationReport>,
    pub primary_artifact: Option<PathBuf>,
    pub secondary_artifact: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress(JobSnapshot),
    Complete(JobSnapshot),
    Error(JobSnapshot),
}

/// Per-job broadcast "rooms", so a subscriber joining after submission still
/// gets every event from the point it joined onward.
#[derive(Default)]
pub struct RoomHub {
    rooms: AsyncMutex<std::collections::HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub async fn publish(&self, job_id: &str, event: ProgressEvent) {
        let mut rooms = self.rooms.lock().await;
        let sender = rooms
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        // No receivers yet is normal (nobody subscribed this tick); not an error.
        let _ = sender.send(event);
    }

    pub async fn drop_room(&self, job_id: &str) {
        self.rooms.lock().await.remove(job_id);
    }
}

/// Deterministic pre-order walk of `.php` files under `root`, sorted per
/// directory level so two runs over an unchanged tree enumerate identically.
fn enumerate_php_files(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, base: &Path, out: &mut Vec<PathBuf>) {
        let Ok(read_dir) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = read_dir.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, base, out);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("php") {
                if let Ok(relative) = path.strip_prefix(base) {
                    out.push(relative.to_path_buf());
                }
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out
}

/// Cheap first pass: count translatable strings without protecting or
/// translating anything, so the job can report an honest percent from the
/// first progress event onward.
fn count_total_strings(source_dir: &Path, relative_files: &[PathBuf]) -> usize {
    let mut total = 0;
    for relative in relative_files {
        let Ok(content) = std::fs::read_to_string(source_dir.join(relative)) else {
            continue;
        };
        total += content
            .lines()
            .filter(|line| crate::transform::classify(line).is_some())
            .count();
    }
    total
}

/// Drive one job to completion: enumerate, dispatch, aggregate, validate,
/// package. Never returns an error: every failure mode is recorded on the
/// job itself and surfaced through `ProgressEvent::Error`.
pub async fn run_job(
    job: Arc<AsyncMutex<Job>>,
    chain: Arc<ProviderChain>,
    rooms: Arc<RoomHub>,
    max_parallel_files: usize,
    batch_size: usize,
) {
    let (job_id, source_dir, output_dir, inter_call_delay, cancel) = {
        let mut guard = job.lock().await;
        guard.status = JobStatus::Running;
        guard.started_at = Some(Utc::now());
        (
            guard.id.clone(),
            guard.source_dir.clone(),
            guard.output_dir.clone(),
            guard.inter_call_delay,
            guard.cancel.clone(),
        )
    };

    info!("job {job_id}: starting, source={}", source_dir.display());

    let relative_files = enumerate_php_files(&source_dir);
    let total_strings = count_total_strings(&source_dir, &relative_files);

    {
        let mut guard = job.lock().await;
        guard.total_files = relative_files.len();
        guard.total_strings = total_strings;
    }
    publish_progress(&job, &rooms).await;

    if let Err(err) = std::fs::create_dir_all(&output_dir) {
        let mut guard = job.lock().await;
        guard.status = JobStatus::Failed;
        guard.finished_at = Some(Utc::now());
        guard.push_error(format!("failed to create output directory: {err}"));
        drop(guard);
        publish_terminal(&job, &rooms, true).await;
        return;
    }

    let semaphore = Arc::new(Semaphore::new(max_parallel_files.max(1)));
    let mut handles = Vec::with_capacity(relative_files.len());

    for relative in relative_files.iter().cloned() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let input_path = source_dir.join(&relative);
        let output_path = output_dir.join(&relative);
        if let Some(parent) = output_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let chain = chain.clone();
        let job = job.clone();
        let rooms = rooms.clone();
        let cancel_for_worker = cancel.clone();
        let relative_label = relative.display().to_string();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let job_for_batches = job.clone();
            let rooms_for_batches = rooms.clone();
            let outcome = worker::translate_file(
                &input_path,
                &output_path,
                &chain,
                batch_size,
                inter_call_delay,
                &cancel_for_worker,
                move |n| {
                    // `on_batch` is synchronous; a blocked try_lock just means
                    // the aggregate pass below will pick up the delta instead.
                    if let Ok(mut guard) = job_for_batches.try_lock() {
                        guard.translated_strings += n;
                        let snapshot = guard.snapshot();
                        let rooms = rooms_for_batches.clone();
                        let job_id = snapshot.id.clone();
                        tokio::spawn(async move {
                            rooms.publish(&job_id, ProgressEvent::Progress(snapshot)).await;
                        });
                    }
                },
            )
            .await;

            let mut guard = job.lock().await;
            guard.files_done += 1;
            guard.current_file = Some(relative_label.clone());
            for error in outcome.errors {
                guard.push_error(error);
            }
            drop(guard);
            publish_progress(&job, &rooms).await;
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.await;
    }

    if cancel.load(Ordering::Relaxed) {
        let mut guard = job.lock().await;
        guard.status = JobStatus::Cancelled;
        guard.finished_at = Some(Utc::now());
        drop(guard);
        publish_terminal(&job, &rooms, false).await;
        rooms.drop_room(&job_id).await;
        return;
    }

    let report = validator::validate_tree(&source_dir, &output_dir, &relative_files);

    let primary_path = output_dir.with_extension("zip");
    let secondary_path = output_dir.with_extension("tar.gz");
    let mut packaging_errors = Vec::new();

    if let Err(err) = archive::write_primary_archive(&output_dir, &primary_path) {
        packaging_errors.push(format!("failed to build output.zip: {err}"));
    }
    if let Err(err) = archive::write_secondary_archive(&source_dir, &output_dir, &secondary_path) {
        packaging_errors.push(format!("failed to build voipnow.tar.gz: {err}"));
    }

    {
        let mut guard = job.lock().await;
        guard.validation_report = Some(report);
        if packaging_errors.is_empty() {
            guard.primary_artifact = Some(primary_path);
            guard.secondary_artifact = Some(secondary_path);
        }
        for error in packaging_errors {
            guard.push_error(error);
        }
        guard.status = JobStatus::Completed;
        guard.finished_at = Some(Utc::now());
    }

    publish_terminal(&job, &rooms, false).await;
    rooms.drop_room(&job_id).await;
    info!("job {job_id}: completed");
}

async fn publish_progress(job: &Arc<AsyncMutex<Job>>, rooms: &Arc<RoomHub>) {
    let (id, snapshot) = {
        let guard = job.lock().await;
        (guard.id.clone(), guard.snapshot())
    };
    rooms.publish(&id, ProgressEvent::Progress(snapshot)).await;
}

async fn publish_terminal(job: &Arc<AsyncMutex<Job>>, rooms: &Arc<RoomHub>, failed: bool) {
    let (id, snapshot) = {
        let guard = job.lock().await;
        (guard.id.clone(), guard.snapshot())
    };
    let event = if failed {
        ProgressEvent::Error(snapshot)
    } else {
        ProgressEvent::Complete(snapshot)
    };
    rooms.publish(&id, event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NullCacheStore, TwoLevelCache};
    use crate::providers::{Provider, ProviderStatsSnapshot, ProviderStatus};
    use std::fs;
    use tempfile::tempdir;

    struct UppercaseProvider;

    #[async_trait::async_trait]
    impl Provider for UppercaseProvider {
        fn name(&self) -> &'static str {
            "uppercase"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn status(&self) -> ProviderStatus {
            ProviderStatus::Available
        }
        fn precheck_rate(&self) -> bool {
            true
        }
        async fn translate(&self, text: &str) -> Option<String> {
            Some(text.to_uppercase())
        }
        fn stats_snapshot(&self) -> ProviderStatsSnapshot {
            ProviderStatsSnapshot::default()
        }
    }

    fn test_chain() -> Arc<ProviderChain> {
        let cache = Arc::new(TwoLevelCache::new(Box::new(NullCacheStore), 10));
        Arc::new(ProviderChain::new(vec![Box::new(UppercaseProvider)], cache))
    }

    #[tokio::test]
    async fn percent_is_zero_with_no_strings() {
        let job = Job::new(
            "aaaaaaaa".into(),
            "alice".into(),
            PathBuf::from("/tmp/src"),
            PathBuf::from("/tmp/out"),
            Duration::from_millis(0),
        );
        assert_eq!(job.percent(), 0.0);
    }

    #[tokio::test]
    async fn errors_are_capped_at_ten() {
        let mut job = Job::new(
            "aaaaaaaa".into(),
            "alice".into(),
            PathBuf::from("/tmp/src"),
            PathBuf::from("/tmp/out"),
            Duration::from_millis(0),
        );
        for i in 0..15 {
            job.push_error(format!("error {i}"));
        }
        assert_eq!(job.errors.len(), MAX_RETAINED_ERRORS);
        assert_eq!(job.errors.front().unwrap(), "error 5");
    }

    #[tokio::test]
    async fn run_job_translates_tree_and_completes() {
        let source = tempdir().unwrap();
        fs::create_dir_all(source.path().join("sub")).unwrap();
        fs::write(
            source.path().join("a.php"),
            "<?php\n$msg_arr['ok'] = 'save changes';\n",
        )
        .unwrap();
        fs::write(
            source.path().join("sub/b.php"),
            "$msg_arr['x'] = 'hello {user}';\n",
        )
        .unwrap();

        let output_root = tempdir().unwrap();
        let output_dir = output_root.path().join("out");

        let job = Arc::new(AsyncMutex::new(Job::new(
            "deadbeef".into(),
            "alice".into(),
            source.path().to_path_buf(),
            output_dir.clone(),
            Duration::from_millis(0),
        )));
        let rooms = Arc::new(RoomHub::new());
        let mut subscriber = rooms.subscribe("deadbeef").await;

        run_job(job.clone(), test_chain(), rooms.clone(), 2, 100).await;

        let guard = job.lock().await;
        assert_eq!(guard.status, JobStatus::Completed);
        assert_eq!(guard.total_files, 2);
        assert_eq!(guard.translated_strings, 2);
        assert!(guard.validation_report.is_some());
        assert!(guard.primary_artifact.is_some());
        assert!(guard.secondary_artifact.is_some());
        drop(guard);

        let mut saw_complete = false;
        while let Ok(event) = subscriber.try_recv() {
            if matches!(event, ProgressEvent::Complete(_)) {
                saw_complete = true;
            }
        }
        assert!(saw_complete);

        let translated = fs::read_to_string(output_dir.join("a.php")).unwrap();
        assert!(translated.contains("SAVE CHANGES"));
    }

    #[tokio::test]
    async fn run_job_honors_cancellation_before_packaging() {
        let source = tempdir().unwrap();
        fs::write(
            source.path().join("a.php"),
            "$msg_arr['ok'] = 'save changes';\n",
        )
        .unwrap();
        let output_root = tempdir().unwrap();
        let output_dir = output_root.path().join("out");

        let job = Arc::new(AsyncMutex::new(Job::new(
            "cafebabe".into(),
            "alice".into(),
            source.path().to_path_buf(),
            output_dir.clone(),
            Duration::from_millis(0),
        )));
        job.lock().await.cancel.store(true, Ordering::Relaxed);

        let rooms = Arc::new(RoomHub::new());
        run_job(job.clone(), test_chain(), rooms, 2, 100).await;

        let guard = job.lock().await;
        assert_eq!(guard.status, JobStatus::Cancelled);
        assert!(guard.validation_report.is_none());
    }
}
