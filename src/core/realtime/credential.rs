//! Short-lived credential retrieval.
//!
//! The issuing endpoint is an external service owned by the host application.
//! It answers a plain `GET` with `{ "client_secret": { "value": "...",
//! "expires_at": 1700000000 } }`. The value is an ephemeral bearer token that
//! is only ever used for one SDP exchange.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroize;

use super::base::{RealtimeError, RealtimeResult};

/// An ephemeral bearer credential.
///
/// The value is redacted from `Debug` output and wiped from memory on drop.
pub struct Credential {
    value: String,
    expires_at: Option<u64>,
}

impl Credential {
    pub fn new(value: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// The raw bearer value.
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Expiry as unix seconds, when the issuer reported one.
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<u64>,
}

/// Obtains credentials from the issuing endpoint.
///
/// One request per call. There is no retry: a failure is reported to the
/// caller, which aborts the current start attempt.
#[derive(Debug, Clone)]
pub struct CredentialBroker {
    token_url: Url,
    http_client: Client,
}

impl CredentialBroker {
    /// Create a broker with a client bounded by `timeout`.
    pub fn new(token_url: Url, timeout: Duration) -> RealtimeResult<Self> {
        let http_client = Client::builder().timeout(timeout).build().map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
        })?;
        Ok(Self {
            token_url,
            http_client,
        })
    }

    /// Fetch one credential.
    pub async fn fetch_credential(&self) -> RealtimeResult<Credential> {
        debug!(url = %self.token_url, "Requesting session credential");

        let response = self
            .http_client
            .get(self.token_url.clone())
            .send()
            .await
            .map_err(|e| RealtimeError::CredentialFailed(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RealtimeError::CredentialFailed(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            warn!(%status, "Credential endpoint rejected the request");
            return Err(RealtimeError::CredentialFailed(format!(
                "Issuer returned {status}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            RealtimeError::CredentialFailed(format!("Malformed credential response: {e}"))
        })?;

        let ClientSecret { value, expires_at } = parsed.client_secret;
        if value.trim().is_empty() {
            return Err(RealtimeError::CredentialFailed(
                "Credential response carried an empty secret".to_string(),
            ));
        }

        Ok(Credential::new(value, expires_at))
    }
}
