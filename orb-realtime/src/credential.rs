//! Short-lived session credentials from the backend proxy.
//!
//! The proxy is an opaque collaborator: `POST` with no body, receive a
//! single-use secret. The secret is wrapped in [`SecretString`] so it never
//! leaks through `Debug` or logs.

use crate::config::OrbConfig;
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// A short-lived token authorising exactly one connection attempt.
///
/// Not `Clone`: the negotiator takes it by value, so each credential is
/// consumed once.
pub struct SessionCredential {
    secret: SecretString,
    id: String,
}

impl SessionCredential {
    /// Build a credential from its parts.
    pub fn new(secret: impl Into<String>, id: impl Into<String>) -> Self {
        Self { secret: SecretString::from(secret.into()), id: id.into() }
    }

    /// Session id assigned by the remote service (may be empty).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The bearer secret. Only the signaling step should call this.
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Source of session credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Request a fresh credential. Never retried internally.
    async fn request_credential(&self) -> Result<SessionCredential>;
}

/// Success body. The original proxy used `client_secret`; `secret` is the canonical key.
#[derive(Debug, Deserialize)]
struct CredentialBody {
    #[serde(default, alias = "client_secret")]
    secret: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Failure body returned by the proxy alongside HTTP 500.
#[derive(Debug, Deserialize)]
struct ProxyErrorBody {
    error: String,
    #[serde(default)]
    detail: Option<String>,
}

/// [`CredentialProvider`] backed by an HTTP proxy endpoint.
#[derive(Debug, Clone)]
pub struct HttpCredentialClient {
    client: reqwest::Client,
    url: String,
}

impl HttpCredentialClient {
    /// Create a client for the given endpoint using the config's request timeout.
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| RealtimeError::config(format!("HTTP client: {e}")))?;
        Ok(Self { client, url: url.into() })
    }

    /// Create a client from session configuration.
    pub fn from_config(config: &OrbConfig) -> Result<Self> {
        Self::new(config.credential_url.clone(), config.request_timeout)
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialClient {
    async fn request_credential(&self) -> Result<SessionCredential> {
        tracing::debug!(url = %self.url, "Requesting session credential");

        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| RealtimeError::upstream(format!("credential request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RealtimeError::upstream(format!("credential response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(proxy_failure(status, &body));
        }

        parse_credential(&body)
    }
}

/// Classify a failed proxy response.
///
/// A 500 carrying only an `error` field is the proxy reporting its own
/// misconfiguration. Anything else is a failed upstream call.
fn proxy_failure(status: reqwest::StatusCode, body: &str) -> RealtimeError {
    let diagnostic = proxy_diagnostic(status, body);
    match serde_json::from_str::<ProxyErrorBody>(body) {
        Ok(ProxyErrorBody { detail: None, .. })
            if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR =>
        {
            RealtimeError::credential(diagnostic)
        }
        _ => RealtimeError::upstream(diagnostic),
    }
}

/// Turn a failed proxy response into readable text.
fn proxy_diagnostic(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ProxyErrorBody>(body) {
        Ok(ProxyErrorBody { error, detail: Some(detail) }) => {
            format!("{error}: {detail} (status {status})")
        }
        Ok(ProxyErrorBody { error, detail: None }) => format!("{error} (status {status})"),
        Err(_) if body.trim().is_empty() => format!("proxy returned status {status}"),
        Err(_) => format!("{} (status {status})", body.trim()),
    }
}

/// Parse a successful proxy body.
fn parse_credential(body: &str) -> Result<SessionCredential> {
    let parsed: CredentialBody = serde_json::from_str(body)
        .map_err(|e| RealtimeError::credential(format!("malformed proxy response: {e}")))?;

    match parsed.secret {
        Some(secret) if !secret.is_empty() => {
            let credential = SessionCredential::new(secret, parsed.id.unwrap_or_default());
            tracing::debug!(session_id = %credential.id(), "Obtained session credential");
            Ok(credential)
        }
        _ => Err(RealtimeError::credential("proxy response has no secret")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_secret_keys() {
        let c = parse_credential(r#"{"secret":"ek_1","id":"sess_1"}"#).unwrap();
        assert_eq!(c.expose_secret(), "ek_1");
        assert_eq!(c.id(), "sess_1");

        let c = parse_credential(r#"{"client_secret":"ek_2","id":"sess_2"}"#).unwrap();
        assert_eq!(c.expose_secret(), "ek_2");
    }

    #[test]
    fn missing_or_empty_secret_is_unavailable() {
        for body in [r#"{"id":"sess"}"#, r#"{"secret":"","id":"x"}"#, r#"{"secret":null}"#, "<html>"] {
            let err = parse_credential(body).unwrap_err();
            assert!(matches!(err, RealtimeError::CredentialUnavailable(_)), "{body}: {err:?}");
        }
    }

    #[test]
    fn debug_redacts_secret() {
        let c = SessionCredential::new("ek_super_secret", "sess");
        let rendered = format!("{c:?}");
        assert!(!rendered.contains("ek_super_secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn diagnostic_joins_error_and_detail() {
        let status = reqwest::StatusCode::INTERNAL_SERVER_ERROR;
        let msg = proxy_diagnostic(status, r#"{"error":"Failed to create session","detail":"quota"}"#);
        assert!(msg.starts_with("Failed to create session: quota"));

        let msg = proxy_diagnostic(status, r#"{"error":"OPENAI_API_KEY not configured"}"#);
        assert!(msg.starts_with("OPENAI_API_KEY not configured"));

        assert!(proxy_diagnostic(status, "").contains("500"));
    }

    #[test]
    fn misconfigured_proxy_is_credential_unavailable() {
        let status = reqwest::StatusCode::INTERNAL_SERVER_ERROR;
        let err = proxy_failure(status, r#"{"error":"OPENAI_API_KEY not configured"}"#);
        assert!(matches!(err, RealtimeError::CredentialUnavailable(_)), "{err:?}");

        let err = proxy_failure(status, r#"{"error":"Failed to create session","detail":"quota"}"#);
        assert!(matches!(err, RealtimeError::UpstreamError(_)), "{err:?}");

        let err = proxy_failure(reqwest::StatusCode::BAD_GATEWAY, r#"{"error":"bad gateway"}"#);
        assert!(matches!(err, RealtimeError::UpstreamError(_)), "{err:?}");

        assert!(matches!(proxy_failure(status, ""), RealtimeError::UpstreamError(_)));
    }
}
