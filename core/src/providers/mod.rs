//! Provider Clients (SPEC_FULL §4.B): a shared capability interface plus
//! four concrete remote-translation backends, each with its own rate-limit
//! posture and batch protocol.

mod deepl;
mod google_free;
mod mymemory;
mod shell;
pub mod state;

pub use deepl::DeeplProvider;
pub use google_free::GoogleFreeProvider;
pub use mymemory::MyMemoryProvider;
pub use shell::ShellProvider;
pub use state::ProviderStatsSnapshot;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Available,
    RateLimited,
    Disabled,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Available => "available",
            ProviderStatus::RateLimited => "rate_limited",
            ProviderStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build HTTP client for provider {0}: {1}")]
    ClientBuild(String, String),
}

/// Capability set shared by every concrete provider (SPEC_FULL §9:
/// "dynamic dispatch over providers" becomes a closed set of trait impls,
/// not an open plugin system).
///
/// `translate`/`translate_batch` never raise: a failed call surfaces as
/// `None` (or a positional `None` hole in the batch), with the reason
/// recorded on the provider's own [`state::RateState`].
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Static availability: has credentials / is the backing tool present?
    fn is_available(&self) -> bool;

    fn status(&self) -> ProviderStatus;

    /// Free-running sliding-window RPM gate, independent of cooldown.
    fn precheck_rate(&self) -> bool;

    async fn translate(&self, text: &str) -> Option<String>;

    /// Aligned to input positions; a `None` element means that position
    /// failed. Default implementation is sequential; providers whose
    /// protocol supports real batching override this.
    async fn translate_batch(&self, texts: &[String]) -> Vec<Option<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate(text).await);
        }
        out
    }

    fn stats_snapshot(&self) -> ProviderStatsSnapshot;
}
