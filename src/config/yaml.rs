use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional so a file can override only what it needs.
/// Values present here take priority over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   token_url: "http://localhost:3000/token"
///   url: "https://api.openai.com/v1/realtime"
///   model: "gpt-4o-mini-realtime-preview"
///   voice: "alloy"
///   instructions: "You are a helpful assistant."
///   request_timeout_seconds: 30
///   data_channel: "oai-events"
///
/// tools:
///   dismiss_after_ms: 10000
///   follow_up_after_ms: 500
///   drift_threshold: 0.3
///   drift_stop_words: ["weather", "temperature", "forecast", "climate"]
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub tools: Option<ToolsYaml>,
}

/// Realtime endpoint settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub token_url: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub request_timeout_seconds: Option<u64>,
    pub data_channel: Option<String>,
}

/// Tool dispatch settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub dismiss_after_ms: Option<u64>,
    pub follow_up_after_ms: Option<u64>,
    pub drift_threshold: Option<f64>,
    pub drift_stop_words: Option<Vec<String>>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
