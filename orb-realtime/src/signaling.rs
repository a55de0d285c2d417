//! Offer/answer exchange with the remote speech service.

use crate::config::OrbConfig;
use crate::credential::SessionCredential;
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;

/// Trades a local SDP offer for the remote SDP answer.
#[async_trait]
pub trait SdpExchange: Send + Sync {
    /// Send `offer_sdp` authorised by `credential` and return the answer SDP text.
    async fn exchange(&self, credential: &SessionCredential, offer_sdp: &str) -> Result<String>;
}

/// JSON answer shape some deployments return instead of raw SDP.
#[derive(Debug, serde::Deserialize)]
struct SdpAnswerBody {
    sdp: String,
}

/// [`SdpExchange`] over HTTP: `POST {realtime_url}?model={model}` with the raw offer.
#[derive(Debug, Clone)]
pub struct HttpSdpExchange {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpSdpExchange {
    /// Create an exchange for `base_url` and `model`.
    pub fn new(base_url: &str, model: &str, timeout: std::time::Duration) -> Result<Self> {
        let mut endpoint = url::Url::parse(base_url)
            .map_err(|e| RealtimeError::config(format!("realtime_url: {e}")))?;
        endpoint.query_pairs_mut().append_pair("model", model);

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| RealtimeError::config(format!("HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// Create an exchange from session configuration.
    pub fn from_config(config: &OrbConfig) -> Result<Self> {
        Self::new(&config.realtime_url, &config.model, config.request_timeout)
    }

    /// The full negotiation URL, model included.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait]
impl SdpExchange for HttpSdpExchange {
    async fn exchange(&self, credential: &SessionCredential, offer_sdp: &str) -> Result<String> {
        tracing::debug!(endpoint = %self.endpoint, offer_len = offer_sdp.len(), "Posting SDP offer");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", credential.expose_secret()))
            .header("Content-Type", "application/sdp")
            .header("OpenAI-Beta", "realtime=v1")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| RealtimeError::negotiation(format!("SDP exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RealtimeError::negotiation(format!(
                "SDP exchange failed with status {status}: {}",
                body.trim()
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| RealtimeError::negotiation(format!("Failed to read SDP answer: {e}")))?;

        let answer = if content_type.contains("application/json") {
            serde_json::from_str::<SdpAnswerBody>(&body)
                .map_err(|e| RealtimeError::negotiation(format!("Malformed SDP answer JSON: {e}")))?
                .sdp
        } else {
            body
        };

        if answer.trim().is_empty() {
            return Err(RealtimeError::negotiation("SDP answer is empty"));
        }

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_model_query() {
        let exchange = HttpSdpExchange::new(
            "https://api.openai.com/v1/realtime",
            "gpt-4o-realtime-preview-2024-12-17",
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            exchange.endpoint().as_str(),
            "https://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"
        );
    }

    #[test]
    fn bad_base_url_is_config_error() {
        let err = HttpSdpExchange::new("not a url", "m", std::time::Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RealtimeError::ConfigError(_)));
    }
}
