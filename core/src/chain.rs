//! Provider Chain (SPEC_FULL §4.D): fallback orchestration over the cache
//! and an ordered provider list. Grounded on
//! `original_source/backend/engine/engine.py`'s `TranslationEngine`.

use std::sync::Arc;

use log::{debug, warn};

use crate::cache::TwoLevelCache;
use crate::providers::{Provider, ProviderStatsSnapshot, ProviderStatus};

pub struct ProviderChain {
    providers: Vec<Box<dyn Provider>>,
    cache: Arc<TwoLevelCache>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn Provider>>, cache: Arc<TwoLevelCache>) -> Self {
        Self { providers, cache }
    }

    /// Translate a single string through cache-then-fallback-chain. Always
    /// returns something: the translation on success, the original text
    /// when every provider fails or is unavailable.
    pub async fn translate(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let (cached, _) = self.cache.lookup(text);
        if let Some(cached) = cached {
            return cached;
        }

        for provider in &self.providers {
            if !self.provider_is_usable(provider.as_ref()) {
                continue;
            }

            debug!("trying {} for a single translation", provider.name());
            if let Some(result) = provider.translate(text).await {
                if !trim_lower_eq(&result, text) {
                    self.cache.store(text, &result, true);
                    return result;
                }
            }
        }

        warn!("all providers failed to translate: {text:.60}");
        text.to_string()
    }

    /// Translate a batch, preserving input order. Unresolved positions fall
    /// back to their original text, never `None`.
    pub async fn translate_batch(&self, texts: &[String]) -> Vec<String> {
        if texts.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<Option<String>> = vec![None; texts.len()];
        let mut pending: Vec<usize> = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                results[index] = Some(text.clone());
                continue;
            }
            let (cached, _) = self.cache.lookup(text);
            match cached {
                Some(value) => results[index] = Some(value),
                None => pending.push(index),
            }
        }

        for provider in &self.providers {
            if pending.is_empty() {
                break;
            }
            if !self.provider_is_usable(provider.as_ref()) {
                continue;
            }

            let batch_texts: Vec<String> = pending.iter().map(|&i| texts[i].clone()).collect();
            debug!(
                "trying a batch of {} with {}",
                batch_texts.len(),
                provider.name()
            );
            let batch_results = provider.translate_batch(&batch_texts).await;

            let mut still_pending = Vec::new();
            for (position, &original_index) in pending.iter().enumerate() {
                let original_text = &texts[original_index];
                let translated = batch_results.get(position).cloned().flatten();

                match translated {
                    Some(value) if !trim_lower_eq(&value, original_text) => {
                        self.cache.store(original_text, &value, true);
                        results[original_index] = Some(value);
                    }
                    _ => still_pending.push(original_index),
                }
            }
            pending = still_pending;
        }

        for index in pending {
            warn!("all providers failed to translate: {:.60}", texts[index]);
            results[index] = Some(texts[index].clone());
        }

        results
            .into_iter()
            .map(|entry| entry.expect("every position is resolved by the end of the chain"))
            .collect()
    }

    pub fn active_provider(&self) -> Option<&'static str> {
        self.providers
            .iter()
            .find(|p| p.status() == ProviderStatus::Available)
            .map(|p| p.name())
    }

    pub fn provider_snapshots(&self) -> Vec<(&'static str, ProviderStatus, ProviderStatsSnapshot)> {
        self.providers
            .iter()
            .map(|p| (p.name(), p.status(), p.stats_snapshot()))
            .collect()
    }

    fn provider_is_usable(&self, provider: &dyn Provider) -> bool {
        match provider.status() {
            ProviderStatus::Disabled | ProviderStatus::RateLimited => false,
            ProviderStatus::Available => provider.precheck_rate(),
        }
    }
}

fn trim_lower_eq(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NullCacheStore;

    struct StubProvider {
        name: &'static str,
        status: ProviderStatus,
        responses: std::sync::Mutex<std::collections::VecDeque<Option<String>>>,
    }

    #[async_trait::async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.status != ProviderStatus::Disabled
        }

        fn status(&self) -> ProviderStatus {
            self.status
        }

        fn precheck_rate(&self) -> bool {
            true
        }

        async fn translate(&self, _text: &str) -> Option<String> {
            self.responses.lock().unwrap().pop_front().flatten()
        }

        fn stats_snapshot(&self) -> ProviderStatsSnapshot {
            ProviderStatsSnapshot::default()
        }
    }

    fn stub(
        name: &'static str,
        status: ProviderStatus,
        responses: Vec<Option<&str>>,
    ) -> Box<dyn Provider> {
        Box::new(StubProvider {
            name,
            status,
            responses: std::sync::Mutex::new(
                responses.into_iter().map(|r| r.map(str::to_string)).collect(),
            ),
        })
    }

    #[tokio::test]
    async fn falls_back_through_chain_skipping_unusable_providers() {
        let providers = vec![
            stub("fails", ProviderStatus::Available, vec![None]),
            stub("cooling_down", ProviderStatus::RateLimited, vec![]),
            stub("succeeds", ProviderStatus::Available, vec![Some("Salvar")]),
        ];
        let cache = Arc::new(TwoLevelCache::new(Box::new(NullCacheStore), 10));
        let chain = ProviderChain::new(providers, cache);

        let result = chain.translate("Save").await;
        assert_eq!(result, "Salvar");
    }

    #[tokio::test]
    async fn returns_input_when_every_provider_fails() {
        let providers = vec![stub("fails", ProviderStatus::Available, vec![None])];
        let cache = Arc::new(TwoLevelCache::new(Box::new(NullCacheStore), 10));
        let chain = ProviderChain::new(providers, cache);

        let result = chain.translate("Save changes").await;
        assert_eq!(result, "Save changes");
    }

    #[tokio::test]
    async fn batch_preserves_order_and_length() {
        struct EchoReverse;
        #[async_trait::async_trait]
        impl Provider for EchoReverse {
            fn name(&self) -> &'static str {
                "echo_reverse"
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
                Some(text.chars().rev().collect())
            }
            fn stats_snapshot(&self) -> ProviderStatsSnapshot {
                ProviderStatsSnapshot::default()
            }
        }

        let providers: Vec<Box<dyn Provider>> = vec![Box::new(EchoReverse)];
        let cache = Arc::new(TwoLevelCache::new(Box::new(NullCacheStore), 10));
        let chain = ProviderChain::new(providers, cache);

        let inputs = vec!["abc".to_string(), "".to_string(), "xyz".to_string()];
        let results = chain.translate_batch(&inputs).await;
        assert_eq!(results, vec!["cba".to_string(), "".to_string(), "zyx".to_string()]);
    }
}
