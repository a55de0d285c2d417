//! Control channel wire messages.
//!
//! Only the messages this client actually sends or inspects are modelled;
//! everything else the remote service emits parses as [`ServerEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response options attached to `response.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseOptions {
    /// Conversation the response belongs to.
    pub conversation: String,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self { conversation: "default".to_string() }
    }
}

/// Events sent from the client over the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Ask the model to produce a response.
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response options.
        response: ResponseOptions,
    },
}

impl ClientEvent {
    /// The message sent once per attempt to make the model open the conversation.
    pub fn greeting() -> Self {
        Self::ResponseCreate { response: ResponseOptions::default() }
    }

    /// Serialize to the text frame written on the channel.
    pub fn to_wire(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error details carried by a server `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerErrorInfo {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Events received from the remote service over the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session was created on the remote side.
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session details.
        #[serde(default)]
        session: Value,
    },

    /// A response finished.
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response details.
        #[serde(default)]
        response: Value,
    },

    /// The remote service reported an error.
    #[serde(rename = "error")]
    Error {
        /// Error details.
        error: ServerErrorInfo,
    },

    /// Any event this client does not inspect.
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Parse an inbound text frame. Returns `None` for non-JSON or untyped payloads.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_wire_format() {
        let wire = ClientEvent::greeting().to_wire().unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "response.create", "response": { "conversation": "default" } })
        );
    }

    #[test]
    fn parses_known_and_unknown_server_events() {
        let err = ServerEvent::parse(r#"{"type":"error","error":{"message":"bad","code":"x"}}"#);
        assert!(matches!(err, Some(ServerEvent::Error { ref error }) if error.message == "bad"));

        let other = ServerEvent::parse(r#"{"type":"output_audio_buffer.started","item":1}"#);
        assert_eq!(other, Some(ServerEvent::Other));

        assert!(ServerEvent::parse("not json").is_none());
    }
}
