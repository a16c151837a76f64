//! HTTP C, "public fallback": MyMemory's free translation API. Always
//! available, no batching optimization (sequential single requests).

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::state::{is_noop_translation, RateState};
use super::{Provider, ProviderError, ProviderStatsSnapshot, ProviderStatus};

const RPM_CAP: u32 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const ENDPOINT: &str = "https://api.mymemory.translated.net/get";

#[derive(Debug, Deserialize)]
struct MyMemoryResponse {
    #[serde(default, rename = "responseStatus")]
    response_status: serde_json::Value,
    #[serde(default, rename = "responseData")]
    response_data: Option<ResponseData>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(default, rename = "translatedText")]
    translated_text: String,
}

impl MyMemoryResponse {
    fn status_code(&self) -> Option<u16> {
        match &self.response_status {
            serde_json::Value::Number(n) => n.as_u64().map(|v| v as u16),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

pub struct MyMemoryProvider {
    client: Client,
    source_lang: String,
    target_lang: String,
    email: Option<String>,
    rate: Arc<RateState>,
}

impl MyMemoryProvider {
    pub fn new(
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        email: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::ClientBuild("mymemory".into(), err.to_string()))?;
        Ok(Self {
            client,
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            email,
            rate: Arc::new(RateState::new(RPM_CAP)),
        })
    }

    /// Overrides the RPM cap with a config-supplied value.
    pub fn with_rpm_cap(mut self, rpm_cap: u32) -> Self {
        self.rate = Arc::new(RateState::new(rpm_cap));
        self
    }
}

#[async_trait::async_trait]
impl Provider for MyMemoryProvider {
    fn name(&self) -> &'static str {
        "mymemory"
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
        if text.trim().is_empty() {
            return Some(text.to_string());
        }

        let langpair = format!("{}|{}", self.source_lang, self.target_lang);
        let mut query = vec![("q", text.to_string()), ("langpair", langpair)];
        if let Some(email) = &self.email {
            query.push(("de", email.clone()));
        }

        let response = match self.client.get(ENDPOINT).query(&query).send().await {
            Ok(resp) => resp,
            Err(err) => {
                self.rate.record_failure(false, err.to_string());
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.rate.record_failure(false, format!("http {status}"));
            return None;
        }

        let body: MyMemoryResponse = match response.json().await {
            Ok(value) => value,
            Err(err) => {
                self.rate.record_failure(false, err.to_string());
                return None;
            }
        };

        if body.status_code() == Some(429) {
            self.rate.record_failure(true, "responseStatus 429");
            return None;
        }

        let translated = body
            .response_data
            .map(|data| data.translated_text)
            .unwrap_or_default();

        if translated.is_empty() || is_noop_translation(text, &translated) {
            self.rate.record_failure(false, "translation identical to input");
            return None;
        }

        self.rate.record_success();
        Some(translated)
    }

    fn stats_snapshot(&self) -> ProviderStatsSnapshot {
        self.rate.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_available() {
        let provider = MyMemoryProvider::new("en", "pt-br", None).unwrap();
        assert!(provider.is_available());
    }
}
