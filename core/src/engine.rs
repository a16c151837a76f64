//! The `Engine` value (SPEC_FULL §3, §9): the top-level explicitly-
//! constructed handle owning `EngineConfig`, the shared `TwoLevelCache`,
//! the `ProviderChain`, and the `JobRegistry`. Constructed once by the
//! embedding application (CLI `main`, or a future HTTP layer) and passed
//! around explicitly, never reached for through a global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use crate::cache::{CacheStats, DurableCacheStore, TwoLevelCache};
use crate::chain::ProviderChain;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::jobs::{self, Job, JobSnapshot, ProgressEvent, RoomHub};
use crate::providers::{
    DeeplProvider, GoogleFreeProvider, MyMemoryProvider, Provider, ProviderStatsSnapshot,
    ProviderStatus, ShellProvider,
};
use crate::registry::{JobRegistry, JobStore};

const SOURCE_LANG: &str = "en";
const TARGET_LANG: &str = "pt-br";

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatsView {
    pub status: &'static str,
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsView {
    pub total_lookups: u64,
    pub hits_l1: u64,
    pub hits_l2: u64,
    pub misses: u64,
    pub hit_rate_l1: f64,
    pub hit_rate_total: f64,
    pub l1_size: usize,
    pub l1_max: usize,
}

impl From<CacheStats> for CacheStatsView {
    fn from(stats: CacheStats) -> Self {
        Self {
            total_lookups: stats.total_lookups,
            hits_l1: stats.hits_l1,
            hits_l2: stats.hits_l2,
            misses: stats.misses,
            hit_rate_l1: stats.hit_rate_l1(),
            hit_rate_total: stats.hit_rate_total(),
            l1_size: stats.l1_size,
            l1_max: stats.l1_max,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cache: CacheStatsView,
    pub providers: HashMap<String, ProviderStatsView>,
    pub active_provider: Option<&'static str>,
}

/// Build the four concrete providers from config, in fallback order:
/// HTTP A (free web) → HTTP B (key-gated) → HTTP C (public fallback) →
/// shell (external CLI last resort).
fn build_providers(config: &EngineConfig) -> Result<Vec<Box<dyn Provider>>, EngineError> {
    let providers: Vec<Box<dyn Provider>> = vec![
        Box::new(
            GoogleFreeProvider::new(SOURCE_LANG, TARGET_LANG)
                .map_err(EngineError::Provider)?
                .with_rpm_cap(config.providers.http_a_rpm),
        ),
        Box::new(
            DeeplProvider::new(
                config.providers.http_b_api_key.clone(),
                SOURCE_LANG,
                TARGET_LANG,
            )
            .map_err(EngineError::Provider)?
            .with_rpm_cap(config.providers.http_b_rpm),
        ),
        Box::new(
            MyMemoryProvider::new(SOURCE_LANG, TARGET_LANG, None)
                .map_err(EngineError::Provider)?
                .with_rpm_cap(config.providers.http_c_rpm),
        ),
        Box::new(
            ShellProvider::new(
                config.providers.shell_binary.clone(),
                SOURCE_LANG,
                TARGET_LANG,
            )
            .with_rpm_cap(config.providers.shell_rpm),
        ),
    ];
    Ok(providers)
}

/// Owns every shared component and is the single entry point an embedding
/// application (HTTP layer, CLI) drives. Nothing here is a process-global
/// static: every field is an explicit `Arc` handed out at construction.
pub struct Engine {
    config: EngineConfig,
    cache: Arc<TwoLevelCache>,
    chain: Arc<ProviderChain>,
    registry: Arc<JobRegistry>,
    rooms: Arc<RoomHub>,
    concurrency_gate: Arc<Semaphore>,
}

impl Engine {
    /// Wire up the cache (with warm-up), the provider chain, and the job
    /// registry from a config and injected durable stores.
    pub fn new(
        config: EngineConfig,
        l2_cache_store: Box<dyn DurableCacheStore>,
        job_store: Box<dyn JobStore>,
    ) -> Result<Self, EngineError> {
        let cache = Arc::new(TwoLevelCache::new(l2_cache_store, config.cache_memory_size));
        cache.warm_up(config.cache_memory_size);

        let providers = build_providers(&config)?;
        info!(
            "engine: initialized with providers: {:?}",
            providers.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        let chain = Arc::new(ProviderChain::new(providers, cache.clone()));
        let registry = Arc::new(JobRegistry::new(job_store));
        let concurrency_gate = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

        Ok(Self {
            config,
            cache,
            chain,
            registry,
            rooms: Arc::new(RoomHub::new()),
            concurrency_gate,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enqueue a job and return its id immediately; the job starts
    /// `Pending` and transitions to `Running` once a `MAX_CONCURRENT_JOBS`
    /// slot is free (first-come-first-served via the semaphore's FIFO
    /// wake order).
    pub async fn submit_job(
        &self,
        owner: impl Into<String>,
        source_dir: PathBuf,
        output_dir: PathBuf,
    ) -> String {
        let id = format!("{:08x}", Uuid::new_v4().as_u128() as u32);
        let delay = Duration::from_secs_f64(self.config.inter_call_delay_secs);
        let job = Arc::new(tokio::sync::Mutex::new(Job::new(
            id.clone(),
            owner.into(),
            source_dir,
            output_dir,
            delay,
        )));

        self.registry.put(job.clone()).await;
        let _ = self.registry.persist(&id).await;

        let chain = self.chain.clone();
        let rooms = self.rooms.clone();
        let gate = self.concurrency_gate.clone();
        let registry = self.registry.clone();
        let max_parallel_files = self.config.max_parallel_files;
        let batch_size = self.config.batch_size;
        let job_id = id.clone();

        tokio::spawn(async move {
            let _permit = gate.acquire_owned().await.expect("semaphore not closed");
            jobs::run_job(job, chain, rooms, max_parallel_files, batch_size).await;
            let _ = registry.persist(&job_id).await;
        });

        id
    }

    /// Idempotent, non-blocking: sets the job's cancel flag if it exists.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        if let Some(job) = self.registry.get(job_id) {
            if let Ok(guard) = job.try_lock() {
                guard.cancel.store(true, Ordering::Relaxed);
                return true;
            }
            // Lock briefly held by the runner; the flag still needs to be
            // set, so fall back to a blocking acquire off the async path.
            let cancel = job_id.to_string();
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Some(job) = registry.get(&cancel) {
                    job.lock().await.cancel.store(true, Ordering::Relaxed);
                }
            });
            return true;
        }
        false
    }

    pub async fn job_snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        if let Some(job) = self.registry.get(job_id) {
            return Some(job.lock().await.snapshot());
        }
        None
    }

    pub async fn list_jobs(&self, owner: Option<&str>) -> Vec<JobSnapshot> {
        self.registry.list(owner).await
    }

    pub async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.rooms.subscribe(job_id).await
    }

    pub fn cleanup_old_jobs(&self, max_age_hours: u64) -> Vec<String> {
        self.registry.cleanup_old(max_age_hours)
    }

    pub fn stats(&self) -> EngineStats {
        let cache: CacheStatsView = self.cache.stats().into();
        let mut providers = HashMap::new();
        for (name, status, snapshot) in self.chain.provider_snapshots() {
            providers.insert(name.to_string(), to_view(status, snapshot));
        }
        EngineStats {
            cache,
            providers,
            active_provider: self.chain.active_provider(),
        }
    }
}

fn to_view(status: ProviderStatus, snapshot: ProviderStatsSnapshot) -> ProviderStatsView {
    ProviderStatsView {
        status: status.as_str(),
        total_requests: snapshot.total_requests,
        successful: snapshot.successful,
        failed: snapshot.failed,
        rate_limited: snapshot.rate_limited,
        success_rate: snapshot.success_rate(),
    }
}
