//! `phpl10n_engine`: the translation job engine described in SPEC_FULL.md,
//! line-level extract/batch/reinject over `$msg_arr[...]` PHP localization
//! sources, a provider fallback chain with a two-level cache, and a
//! resumable/cancellable/observable job lifecycle. The HTTP/WebSocket
//! façade, auth, and archive-upload handling are out of scope (§1); this
//! crate exposes the `Engine` library API such plumbing calls into.

pub mod archive;
pub mod backup;
pub mod cache;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod providers;
pub mod registry;
pub mod transform;
pub mod validator;
pub mod worker;

pub use cache::{CacheLevel, CacheStats, DurableCacheStore, InMemoryCacheStore, NullCacheStore, TwoLevelCache};
pub use chain::ProviderChain;
pub use config::{EngineConfig, ProviderConfig};
pub use engine::{CacheStatsView, Engine, EngineStats, ProviderStatsView};
pub use error::EngineError;
pub use jobs::{Job, JobSnapshot, JobStatus, ProgressEvent, RoomHub};
pub use registry::{InMemoryJobStore, JobRegistry, JobStore};
pub use transform::{classify, prepare, protect, reinject, LineMatch, PlaceholderMap, QuoteKind, TransformError};
pub use validator::{validate_tree, IssueKind, ValidationCounters, ValidationIssue, ValidationReport};

use once_cell::sync::Lazy;
use regex::Regex;

static JOB_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{8}$").expect("valid job id pattern"));

/// SPEC_FULL §6: any path-segment parameter claiming to be a job id must be
/// validated against this regex before filesystem use.
pub fn is_valid_job_id(candidate: &str) -> bool {
    JOB_ID_PATTERN.is_match(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_pattern_matches_spec() {
        assert!(is_valid_job_id("a1b2c3d4"));
        assert!(!is_valid_job_id("A1B2C3D4"));
        assert!(!is_valid_job_id("a1b2c3d"));
        assert!(!is_valid_job_id("../../etc"));
    }
}
