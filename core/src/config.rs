/// Configuration for the translation engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// "primary free web": always available, no key.
    pub http_a_rpm: u32,
    /// "key-gated premium": requires an API key.
    pub http_b_rpm: u32,
    pub http_b_api_key: Option<String>,
    /// "public fallback": always available.
    pub http_c_rpm: u32,
    /// "external CLI last resort": binary must be on PATH.
    pub shell_rpm: u32,
    pub shell_binary: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            http_a_rpm: 50,
            http_b_rpm: 30,
            http_b_api_key: None,
            http_c_rpm: 30,
            shell_rpm: 20,
            shell_binary: "trans".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub max_concurrent_jobs: usize,
    pub max_parallel_files: usize,
    pub batch_size: usize,
    pub inter_call_delay_secs: f64,
    pub cache_memory_size: usize,
    pub providers: ProviderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_parallel_files: 4,
            batch_size: 100,
            inter_call_delay_secs: 0.2,
            cache_memory_size: 10_000,
            providers: ProviderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp the inter-call delay into the spec's `0.05..=5.0` range,
    /// rebuilding the config with the corrected field.
    pub fn normalized(mut self) -> Self {
        self.inter_call_delay_secs = self.inter_call_delay_secs.clamp(0.05, 5.0);
        self
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content =
            fs::read_to_string(path).map_err(|e| format!("failed to read config file: {e}"))?;
        serde_yaml::from_str::<Self>(&content)
            .map(Self::normalized)
            .map_err(|e| format!("failed to parse yaml config: {e}"))
    }

    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let content =
            serde_yaml::to_string(self).map_err(|e| format!("failed to serialize config: {e}"))?;
        fs::write(path, content).map_err(|e| format!("failed to write config file: {e}"))
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str::<Self>(json)
            .map(Self::normalized)
            .map_err(|e| format!("failed to parse json config: {e}"))
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("failed to serialize to json: {e}"))
    }
}
