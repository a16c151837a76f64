//! HTTP B, "key-gated premium": a DeepL-shaped free-tier API. Requires an
//! API key; batches as one form post with N repeated `text` fields.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::state::{is_noop_translation, is_rate_limit_status, RateState};
use super::{Provider, ProviderError, ProviderStatsSnapshot, ProviderStatus};

const RPM_CAP: u32 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translations: Vec<TranslationEntry>,
}

#[derive(Debug, Deserialize)]
struct TranslationEntry {
    text: String,
}

pub struct DeeplProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    source_lang: String,
    target_lang: String,
    rate: Arc<RateState>,
}

impl DeeplProvider {
    pub fn new(
        api_key: Option<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key, source_lang, target_lang)
    }

    /// Same as [`Self::new`] but pointed at an arbitrary endpoint: used by
    /// tests to redirect at a `wiremock` server instead of the real API.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::ClientBuild("deepl".into(), err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
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

    async fn post_batch(&self, texts: &[String]) -> Result<Vec<String>, (bool, String)> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            (false, "no API key configured".to_string())
        })?;

        let mut form: Vec<(&str, &str)> = vec![
            ("auth_key", api_key),
            ("source_lang", &self.source_lang),
            ("target_lang", &self.target_lang),
        ];
        for text in texts {
            form.push(("text", text.as_str()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|err| (false, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let is_rate = is_rate_limit_status(Some(status.as_u16()));
            return Err((is_rate, format!("http {status}")));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|err| (false, err.to_string()))?;

        if body.translations.is_empty() {
            return Err((false, "empty translations array".into()));
        }

        Ok(body.translations.into_iter().map(|t| t.text).collect())
    }
}

#[async_trait::async_trait]
impl Provider for DeeplProvider {
    fn name(&self) -> &'static str {
        "deepl"
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
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
        if !self.is_available() {
            return None;
        }

        match self.post_batch(std::slice::from_ref(&text.to_string())).await {
            Ok(mut translations) if !translations.is_empty() => {
                let translated = translations.remove(0);
                if is_noop_translation(text, &translated) {
                    self.rate.record_failure(false, "translation identical to input");
                    None
                } else {
                    self.rate.record_success();
                    Some(translated)
                }
            }
            Ok(_) => {
                self.rate.record_failure(false, "empty translations array");
                None
            }
            Err((is_rate, message)) => {
                self.rate.record_failure(is_rate, message);
                None
            }
        }
    }

    async fn translate_batch(&self, texts: &[String]) -> Vec<Option<String>> {
        if !self.is_available() {
            return vec![None; texts.len()];
        }

        let pending: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| (i, text.clone()))
            .collect();

        let mut results: Vec<Option<String>> = texts
            .iter()
            .map(|text| text.trim().is_empty().then(|| text.clone()))
            .collect();

        if pending.is_empty() {
            return results;
        }

        let pending_texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
        match self.post_batch(&pending_texts).await {
            Ok(translations) if translations.len() == pending.len() => {
                self.rate.record_success();
                for ((index, original), translated) in pending.into_iter().zip(translations) {
                    if is_noop_translation(&original, &translated) {
                        results[index] = None;
                    } else {
                        results[index] = Some(translated);
                    }
                }
            }
            Ok(_) => {
                self.rate.record_failure(false, "translation count mismatch");
            }
            Err((is_rate, message)) => {
                self.rate.record_failure(is_rate, message);
            }
        }
        results
    }

    fn stats_snapshot(&self) -> ProviderStatsSnapshot {
        self.rate.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_without_api_key() {
        let provider = DeeplProvider::new(None, "en", "pt-br").unwrap();
        assert!(!provider.is_available());
        assert_eq!(provider.status(), ProviderStatus::Disabled);
    }

    #[test]
    fn available_with_api_key() {
        let provider = DeeplProvider::new(Some("key".into()), "en", "pt-br").unwrap();
        assert!(provider.is_available());
    }

    #[tokio::test]
    async fn batch_translates_against_a_mocked_endpoint() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "translations": [
                    {"text": "Salvar"},
                    {"text": "Cancelar"},
                ]
            })))
            .mount(&server)
            .await;

        let provider = DeeplProvider::with_endpoint(
            format!("{}/v2/translate", server.uri()),
            Some("key".into()),
            "en",
            "pt-br",
        )
        .unwrap();

        let results = provider
            .translate_batch(&["Save".to_string(), "Cancel".to_string()])
            .await;
        assert_eq!(results, vec![Some("Salvar".to_string()), Some("Cancelar".to_string())]);
    }

    #[tokio::test]
    async fn cooldown_on_456() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .respond_with(ResponseTemplate::new(456))
            .mount(&server)
            .await;

        let provider = DeeplProvider::with_endpoint(
            format!("{}/v2/translate", server.uri()),
            Some("key".into()),
            "en",
            "pt-br",
        )
        .unwrap();

        let result = provider.translate("Save changes").await;
        assert!(result.is_none());
        assert_eq!(provider.status(), ProviderStatus::RateLimited);
    }
}
