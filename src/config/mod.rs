//! Configuration for the realtime voice client
//!
//! Settings come from several sources with this priority:
//! YAML > ENV vars > .env values > defaults.
//! The `.env` file is loaded by the binary at startup, so by the time
//! [`SessionSettings::from_env`] runs its values already look like ordinary
//! environment variables.
//!
//! # Environment variables
//! - `REALTIME_TOKEN_URL`: credential issuing endpoint
//! - `REALTIME_URL`: realtime SDP endpoint
//! - `REALTIME_MODEL`, `REALTIME_VOICE`, `REALTIME_INSTRUCTIONS`
//! - `REALTIME_REQUEST_TIMEOUT_SECONDS`
//! - `REALTIME_DATA_CHANNEL`: data channel label
//! - `TOOL_DISMISS_AFTER_MS`, `TOOL_FOLLOW_UP_AFTER_MS`
//! - `TOOL_DRIFT_THRESHOLD`
//! - `TOOL_DRIFT_STOP_WORDS`: comma-separated list
//!
//! # Example
//! ```rust,no_run
//! use realtime_voice_client::config::SessionSettings;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let settings = SessionSettings::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let settings = SessionSettings::from_file(&PathBuf::from("realtime.yaml"))?;
//! println!("Negotiating with {}", settings.realtime_url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

mod yaml;

pub use yaml::{RealtimeYaml, ToolsYaml, YamlConfig};

use crate::core::realtime::openai::{
    DEFAULT_INSTRUCTIONS, OPENAI_EVENTS_CHANNEL, OPENAI_REALTIME_URL, OpenAIRealtimeModel,
    OpenAIRealtimeVoice,
};
use crate::core::realtime::{
    DEFAULT_DISMISS_AFTER, DEFAULT_DRIFT_THRESHOLD, DEFAULT_FOLLOW_UP_AFTER, DEFAULT_STOP_WORDS,
    DispatcherSettings, RealtimeTarget,
};

/// Default credential issuing endpoint (the host application's token route).
pub const DEFAULT_TOKEN_URL: &str = "http://localhost:3000/token";

/// Default timeout for the credential and SDP requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client session settings
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    // Endpoints
    pub token_url: Url,
    pub realtime_url: Url,

    // Session parameters sent with the offer
    pub model: OpenAIRealtimeModel,
    pub voice: OpenAIRealtimeVoice,
    pub instructions: String,

    pub request_timeout: Duration,
    pub data_channel_label: String,

    // Tool dispatch
    pub tool_dismiss_after: Duration,
    pub tool_follow_up_after: Duration,
    pub drift_threshold: f64,
    pub drift_stop_words: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            token_url: builtin_url(DEFAULT_TOKEN_URL),
            realtime_url: builtin_url(OPENAI_REALTIME_URL),
            model: OpenAIRealtimeModel::default(),
            voice: OpenAIRealtimeVoice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            data_channel_label: OPENAI_EVENTS_CHANNEL.to_string(),
            tool_dismiss_after: DEFAULT_DISMISS_AFTER,
            tool_follow_up_after: DEFAULT_FOLLOW_UP_AFTER,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            drift_stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl SessionSettings {
    /// Load settings from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file with environment variables as the base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut settings = Self::default();
        settings.apply_env()?;
        settings.apply_yaml(yaml_config)?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(value) = env_var("REALTIME_TOKEN_URL") {
            self.token_url = parse_url("REALTIME_TOKEN_URL", &value)?;
        }
        if let Some(value) = env_var("REALTIME_URL") {
            self.realtime_url = parse_url("REALTIME_URL", &value)?;
        }
        if let Some(value) = env_var("REALTIME_MODEL") {
            self.model = OpenAIRealtimeModel::from_str_or_default(&value);
        }
        if let Some(value) = env_var("REALTIME_VOICE") {
            self.voice = OpenAIRealtimeVoice::from_str_or_default(&value);
        }
        if let Some(value) = env_var("REALTIME_INSTRUCTIONS") {
            self.instructions = value;
        }
        if let Some(value) = env_var("REALTIME_REQUEST_TIMEOUT_SECONDS") {
            let secs: u64 = value
                .parse()
                .map_err(|e| format!("Invalid REALTIME_REQUEST_TIMEOUT_SECONDS value: {e}"))?;
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = env_var("REALTIME_DATA_CHANNEL") {
            self.data_channel_label = value;
        }
        if let Some(value) = env_var("TOOL_DISMISS_AFTER_MS") {
            let ms: u64 = value
                .parse()
                .map_err(|e| format!("Invalid TOOL_DISMISS_AFTER_MS value: {e}"))?;
            self.tool_dismiss_after = Duration::from_millis(ms);
        }
        if let Some(value) = env_var("TOOL_FOLLOW_UP_AFTER_MS") {
            let ms: u64 = value
                .parse()
                .map_err(|e| format!("Invalid TOOL_FOLLOW_UP_AFTER_MS value: {e}"))?;
            self.tool_follow_up_after = Duration::from_millis(ms);
        }
        if let Some(value) = env_var("TOOL_DRIFT_THRESHOLD") {
            self.drift_threshold = value
                .parse()
                .map_err(|e| format!("Invalid TOOL_DRIFT_THRESHOLD value: {e}"))?;
        }
        if let Some(value) = env_var("TOOL_DRIFT_STOP_WORDS") {
            self.drift_stop_words = value
                .split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect();
        }
        Ok(())
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(realtime) = yaml.realtime {
            if let Some(value) = realtime.token_url {
                self.token_url = parse_url("realtime.token_url", &value)?;
            }
            if let Some(value) = realtime.url {
                self.realtime_url = parse_url("realtime.url", &value)?;
            }
            if let Some(value) = realtime.model {
                self.model = OpenAIRealtimeModel::from_str_or_default(&value);
            }
            if let Some(value) = realtime.voice {
                self.voice = OpenAIRealtimeVoice::from_str_or_default(&value);
            }
            if let Some(value) = realtime.instructions {
                self.instructions = value;
            }
            if let Some(secs) = realtime.request_timeout_seconds {
                self.request_timeout = Duration::from_secs(secs);
            }
            if let Some(value) = realtime.data_channel {
                self.data_channel_label = value;
            }
        }

        if let Some(tools) = yaml.tools {
            if let Some(ms) = tools.dismiss_after_ms {
                self.tool_dismiss_after = Duration::from_millis(ms);
            }
            if let Some(ms) = tools.follow_up_after_ms {
                self.tool_follow_up_after = Duration::from_millis(ms);
            }
            if let Some(threshold) = tools.drift_threshold {
                self.drift_threshold = threshold;
            }
            if let Some(words) = tools.drift_stop_words {
                self.drift_stop_words = words.into_iter().map(|w| w.to_lowercase()).collect();
            }
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.drift_threshold) {
            return Err(format!(
                "Drift threshold must be between 0 and 1, got {}",
                self.drift_threshold
            ));
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be greater than zero".to_string());
        }
        if self.data_channel_label.trim().is_empty() {
            return Err("Data channel label must not be empty".to_string());
        }
        if self.tool_dismiss_after.is_zero() {
            return Err("Tool dismiss delay must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Endpoint and session parameters for the SDP exchange.
    pub fn target(&self) -> RealtimeTarget {
        RealtimeTarget {
            endpoint: self.realtime_url.clone(),
            model: self.model,
            voice: self.voice,
            instructions: self.instructions.clone(),
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            dismiss_after: self.tool_dismiss_after,
            follow_up_after: self.tool_follow_up_after,
            drift_threshold: self.drift_threshold,
            stop_words: self.drift_stop_words.clone(),
        }
    }
}

fn builtin_url(value: &'static str) -> Url {
    Url::parse(value).unwrap_or_else(|e| unreachable!("built-in URL {value} is invalid: {e}"))
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_url(name: &str, value: &str) -> Result<Url, String> {
    let url = Url::parse(value.trim()).map_err(|e| format!("Invalid {name} '{value}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("Invalid {name} '{value}': unsupported scheme {other}")),
    }
}
