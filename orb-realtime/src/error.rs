//! Error types for voice sessions.

use thiserror::Error;

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur while bringing up or running a voice session.
///
/// Every variant is terminal for the current connection attempt. Nothing
/// here is retried automatically; the caller decides whether to start a
/// fresh attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// The credential proxy answered but gave us no usable secret.
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The credential proxy call itself failed.
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// Any step of transport setup or the offer/answer exchange failed.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Microphone capture was refused or no capture device exists.
    #[error("Device access denied: {0}")]
    DeviceAccessDenied(String),

    /// The audio processing context could not be created or resumed.
    #[error("Audio context unavailable: {0}")]
    ContextUnavailable(String),

    /// A start was requested while an attempt is connecting or connected.
    #[error("A connection attempt is already in progress")]
    AttemptInProgress,

    /// The session driver has shut down.
    #[error("Session closed")]
    SessionClosed,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC transport error.
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Opus encode/decode error.
    #[error("Opus codec error: {0}")]
    OpusCodecError(String),
}

impl RealtimeError {
    /// Create a credential-unavailable error.
    pub fn credential<S: Into<String>>(msg: S) -> Self {
        Self::CredentialUnavailable(msg.into())
    }

    /// Create an upstream (credential proxy) error.
    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        Self::UpstreamError(msg.into())
    }

    /// Create a negotiation error.
    pub fn negotiation<S: Into<String>>(msg: S) -> Self {
        Self::NegotiationFailed(msg.into())
    }

    /// Create a device access error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceAccessDenied(msg.into())
    }

    /// Create a processing context error.
    pub fn context<S: Into<String>>(msg: S) -> Self {
        Self::ContextUnavailable(msg.into())
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a WebRTC transport error.
    pub fn webrtc<S: Into<String>>(msg: S) -> Self {
        Self::WebRtcError(msg.into())
    }

    /// Create an Opus codec error.
    pub fn opus<S: Into<String>>(msg: S) -> Self {
        Self::OpusCodecError(msg.into())
    }

    /// Re-wrap any error from a negotiation step as [`RealtimeError::NegotiationFailed`],
    /// prefixing the step name. Already-wrapped errors keep their message.
    pub fn during_negotiation(self, step: &str) -> Self {
        match self {
            Self::NegotiationFailed(msg) => Self::NegotiationFailed(format!("{step}: {msg}")),
            other => Self::NegotiationFailed(format!("{step}: {other}")),
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_wrapping_keeps_context() {
        let err = RealtimeError::webrtc("no payload type").during_negotiation("apply answer");
        assert_eq!(
            err,
            RealtimeError::NegotiationFailed(
                "apply answer: WebRTC error: no payload type".to_string()
            )
        );

        let err = RealtimeError::negotiation("status 401").during_negotiation("exchange");
        assert_eq!(err.to_string(), "Negotiation failed: exchange: status 401");
    }
}
