//! Realtime endpoint constants and the model/voice catalogues.
//!
//! Model and voice are sent as query parameters on the SDP exchange. Unknown
//! names fall back to the defaults instead of failing, so a typo in the
//! configuration degrades to the default model rather than a failed session.

use serde::{Deserialize, Serialize};

/// Realtime SDP exchange endpoint.
pub const OPENAI_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Label of the data channel carrying JSON events.
pub const OPENAI_EVENTS_CHANNEL: &str = "oai-events";

/// Default instructions sent with the SDP exchange.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";

// =============================================================================
// Models
// =============================================================================

/// Realtime models accepted by the SDP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeModel {
    /// GPT-4o Mini Realtime Preview (default)
    #[default]
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
    /// GPT-4o Mini Realtime Preview 2024-12-17
    #[serde(rename = "gpt-4o-mini-realtime-preview-2024-12-17")]
    Gpt4oMiniRealtimePreview20241217,
    /// GPT-4o Realtime Preview
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Realtime Preview 2024-12-17
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
}

impl OpenAIRealtimeModel {
    /// Query parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
            Self::Gpt4oMiniRealtimePreview20241217 => "gpt-4o-mini-realtime-preview-2024-12-17",
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        let wanted = s.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|model| model.as_str() == wanted)
            .unwrap_or_default()
    }

    pub fn all() -> &'static [OpenAIRealtimeModel] {
        &[
            Self::Gpt4oMiniRealtimePreview,
            Self::Gpt4oMiniRealtimePreview20241217,
            Self::Gpt4oRealtimePreview,
            Self::Gpt4oRealtimePreview20241217,
        ]
    }
}

impl std::fmt::Display for OpenAIRealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Output voices for the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Query parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        let wanted = s.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|voice| voice.as_str() == wanted)
            .unwrap_or_default()
    }

    /// Get all available voices.
    pub fn all() -> &'static [OpenAIRealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_default() {
        assert_eq!(
            OpenAIRealtimeModel::default().as_str(),
            "gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_model_parse_falls_back() {
        assert_eq!(
            OpenAIRealtimeModel::from_str_or_default(" GPT-4o-Realtime-Preview "),
            OpenAIRealtimeModel::Gpt4oRealtimePreview
        );
        assert_eq!(
            OpenAIRealtimeModel::from_str_or_default("gpt-2"),
            OpenAIRealtimeModel::Gpt4oMiniRealtimePreview
        );
    }

    #[test]
    fn test_voice_round_trips_through_display() {
        for voice in OpenAIRealtimeVoice::all() {
            assert_eq!(
                OpenAIRealtimeVoice::from_str_or_default(&voice.to_string()),
                *voice
            );
        }
        assert_eq!(
            OpenAIRealtimeVoice::from_str_or_default("robot"),
            OpenAIRealtimeVoice::Alloy
        );
    }

    #[test]
    fn test_voice_serde_lowercase() {
        let json = serde_json::to_string(&OpenAIRealtimeVoice::Shimmer).unwrap();
        assert_eq!(json, "\"shimmer\"");
    }
}
