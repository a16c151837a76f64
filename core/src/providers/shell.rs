//! Shell, "external CLI last resort": wraps a `trans`-compatible binary
//! found on PATH. Sequential only. Per SPEC_FULL §9's open question, an
//! identical-to-input response is treated as a *silent rate limit* here,
//! unlike the HTTP providers (where it is just a no-op failure): the CLI
//! has no structured error channel to tell the two apart.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::process::Command;
use tokio::time::timeout;

use super::state::{is_noop_translation, RateState};
use super::{Provider, ProviderStatsSnapshot, ProviderStatus};

const RPM_CAP: u32 = 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

pub struct ShellProvider {
    binary: String,
    source_lang: String,
    target_lang: String,
    rate: Arc<RateState>,
}

impl ShellProvider {
    pub fn new(binary: impl Into<String>, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            rate: Arc::new(RateState::new(RPM_CAP)),
        }
    }

    /// Overrides the RPM cap with a config-supplied value.
    pub fn with_rpm_cap(mut self, rpm_cap: u32) -> Self {
        self.rate = Arc::new(RateState::new(rpm_cap));
        self
    }

    fn resolve_on_path(binary: &str) -> Option<PathBuf> {
        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var).find_map(|dir| {
            let candidate = dir.join(binary);
            candidate.is_file().then_some(candidate)
        })
    }
}

#[async_trait::async_trait]
impl Provider for ShellProvider {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn is_available(&self) -> bool {
        Self::resolve_on_path(&self.binary).is_some()
    }

    fn status(&self) -> ProviderStatus {
        self.rate.status(self.is_available())
    }

    fn precheck_rate(&self) -> bool {
        self.rate.precheck_rate()
    }

    async fn translate(&self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return Some(text.to_string());
        }

        let langpair = format!("{}:{}", self.source_lang, self.target_lang);
        let spawn = Command::new(&self.binary)
            .args(["-b", &langpair, text])
            .output();

        let output = match timeout(REQUEST_TIMEOUT, spawn).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                self.rate.record_failure(false, err.to_string());
                return None;
            }
            Err(_) => {
                self.rate.record_failure(false, "timeout");
                return None;
            }
        };

        if !output.status.success() {
            self.rate
                .record_failure(false, format!("exit status {:?}", output.status.code()));
            return None;
        }

        let translated = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if translated.is_empty() {
            self.rate.record_failure(false, "empty stdout");
            return None;
        }

        if is_noop_translation(text, &translated) {
            warn!("shell provider returned input unchanged for '{text}'; treating as silent rate limit");
            self.rate
                .record_failure(true, "identical output (silent rate limit)");
            return None;
        }

        self.rate.record_success();
        Some(translated)
    }

    fn stats_snapshot(&self) -> ProviderStatsSnapshot {
        self.rate.snapshot()
    }
}
