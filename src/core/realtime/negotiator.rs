//! SDP offer/answer exchange with the realtime endpoint.
//!
//! Negotiation is a single HTTP round trip:
//!
//! ```text
//! POST <endpoint>?model=<model>&voice=<voice>&instructions=<instructions>
//! Authorization: Bearer <credential>
//! Content-Type: application/sdp
//!
//! <offer sdp>
//! ```
//!
//! A 2xx response body is the answer SDP.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, info, warn};
use url::Url;

use super::base::{RealtimeError, RealtimeResult, SessionDescription};
use super::credential::{Credential, CredentialBroker};
use super::openai::{OpenAIRealtimeModel, OpenAIRealtimeVoice};

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Remote endpoint and the session parameters sent with every exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeTarget {
    /// Realtime SDP endpoint
    pub endpoint: Url,
    /// Model identifier
    pub model: OpenAIRealtimeModel,
    /// Output voice
    pub voice: OpenAIRealtimeVoice,
    /// Session instructions
    pub instructions: String,
}

impl RealtimeTarget {
    /// Endpoint URL with the session parameters appended as query pairs.
    pub fn exchange_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("model", self.model.as_str())
            .append_pair("voice", self.voice.as_str())
            .append_pair("instructions", &self.instructions);
        url
    }
}

/// Exchanges a local offer for the remote answer.
#[derive(Debug, Clone)]
pub struct TransportNegotiator {
    broker: CredentialBroker,
    target: RealtimeTarget,
    http_client: Client,
}

impl TransportNegotiator {
    pub fn new(
        broker: CredentialBroker,
        target: RealtimeTarget,
        timeout: Duration,
    ) -> RealtimeResult<Self> {
        let http_client = Client::builder().timeout(timeout).build().map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
        })?;
        Ok(Self {
            broker,
            target,
            http_client,
        })
    }

    pub fn target(&self) -> &RealtimeTarget {
        &self.target
    }

    /// Fetch a fresh credential and negotiate with it.
    pub async fn exchange(&self, offer: &SessionDescription) -> RealtimeResult<SessionDescription> {
        let credential = self.broker.fetch_credential().await?;
        self.negotiate(offer, &credential).await
    }

    /// Send `offer` to the realtime endpoint and return its answer.
    pub async fn negotiate(
        &self,
        offer: &SessionDescription,
        credential: &Credential,
    ) -> RealtimeResult<SessionDescription> {
        let url = self.target.exchange_url();
        debug!(
            model = %self.target.model,
            voice = %self.target.voice,
            "Sending SDP offer"
        );

        let response = self
            .http_client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", credential.secret()))
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| RealtimeError::NegotiationFailed(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            RealtimeError::NegotiationFailed(format!("Failed to read answer: {e}"))
        })?;

        if !status.is_success() {
            warn!(%status, "Realtime endpoint rejected the offer");
            return Err(RealtimeError::NegotiationFailed(format!(
                "Realtime endpoint returned {status}: {body}"
            )));
        }

        if !is_sdp(&body) {
            return Err(RealtimeError::NegotiationFailed(
                "Answer body is not a session description".to_string(),
            ));
        }

        info!(model = %self.target.model, "Received SDP answer");
        Ok(SessionDescription::answer(body))
    }
}

/// An SDP body starts with the protocol version line.
fn is_sdp(body: &str) -> bool {
    body.trim_start().starts_with("v=")
}
