//! HTTP A, "primary free web": Google's public (keyless) translate
//! endpoint. Always available. Batches as up to 10 parallel single
//! requests.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::state::{is_noop_translation, RateState};
use super::{Provider, ProviderError, ProviderStatsSnapshot, ProviderStatus};

const RPM_CAP: u32 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_IN_FLIGHT: usize = 10;
const DEFAULT_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

pub struct GoogleFreeProvider {
    client: Client,
    endpoint: String,
    source_lang: String,
    target_lang: String,
    rate: Arc<RateState>,
}

impl GoogleFreeProvider {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_endpoint(DEFAULT_ENDPOINT, source_lang, target_lang)
    }

    /// Same as [`Self::new`] but pointed at an arbitrary endpoint: used by
    /// tests to redirect at a `wiremock` server instead of the real API.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::ClientBuild("google_free".into(), err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            rate: Arc::new(RateState::new(RPM_CAP)),
        })
    }

    /// Overrides the RPM cap with a config-supplied value.
    pub fn with_rpm_cap(mut self, rpm_cap: u32) -> Self {
        self.rate = Arc::new(RateState::new(rpm_cap));
        self
    }

    async fn request(
        client: &Client,
        endpoint: &str,
        source_lang: &str,
        target_lang: &str,
        rate: &RateState,
        text: &str,
    ) -> Option<String> {
        if text.trim().is_empty() {
            return Some(text.to_string());
        }

        let response = match client
            .get(endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", source_lang),
                ("tl", target_lang),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                rate.record_failure(false, err.to_string());
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let is_rate = status.as_u16() == 429;
            rate.record_failure(is_rate, format!("http {status}"));
            return None;
        }

        let body: Value = match response.json().await {
            Ok(value) => value,
            Err(err) => {
                rate.record_failure(false, err.to_string());
                return None;
            }
        };

        let translated = body
            .as_array()
            .and_then(|top| top.first())
            .and_then(|sentences| sentences.as_array())
            .map(|sentences| {
                sentences
                    .iter()
                    .filter_map(|sentence| sentence.as_array())
                    .filter_map(|sentence| sentence.first())
                    .filter_map(|chunk| chunk.as_str())
                    .collect::<String>()
            });

        match translated {
            Some(translated) if !translated.is_empty() => {
                if is_noop_translation(text, &translated) {
                    rate.record_failure(false, "translation identical to input");
                    None
                } else {
                    rate.record_success();
                    Some(translated)
                }
            }
            _ => {
                rate.record_failure(false, "empty response body");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Provider for GoogleFreeProvider {
    fn name(&self) -> &'static str {
        "google_free"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn status(&self) -> ProviderStatus {
        self.rate.status(self.is_available())
    }

    fn precheck_rate(&self) -> bool {
        self.rate.precheck_rate()
    }

    async fn translate(&self, text: &str) -> Option<String> {
        Self::request(
            &self.client,
            &self.endpoint,
            &self.source_lang,
            &self.target_lang,
            &self.rate,
            text,
        )
        .await
    }

    async fn translate_batch(&self, texts: &[String]) -> Vec<Option<String>> {
        let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut handles = Vec::with_capacity(texts.len());

        for (index, text) in texts.iter().enumerate() {
            let client = self.client.clone();
            let endpoint = self.endpoint.clone();
            let source_lang = self.source_lang.clone();
            let target_lang = self.target_lang.clone();
            let rate = Arc::clone(&self.rate);
            let text = text.clone();
            let permit = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let result =
                    Self::request(&client, &endpoint, &source_lang, &target_lang, &rate, &text)
                        .await;
                (index, result)
            }));
        }

        let mut results: Vec<Option<String>> = vec![None; texts.len()];
        for handle in handles {
            match handle.await {
                Ok((index, result)) => results[index] = result,
                Err(err) => warn!("google_free batch task panicked: {err}"),
            }
        }
        results
    }

    fn stats_snapshot(&self) -> ProviderStatsSnapshot {
        self.rate.snapshot()
    }
}
