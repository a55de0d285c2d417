//! Peer transport capability interfaces.
//!
//! A [`PeerTransport`] is the peer connection to the remote speech service.
//! It carries local microphone audio, receives the remote voice and hosts one
//! [`ControlChannel`] for structured JSON messages. Asynchronous lifecycle
//! notifications flow back through [`TransportEvents`].

use crate::error::Result;
use crate::media::{MediaTrack, RemoteAudio};
use async_trait::async_trait;
use std::sync::Arc;

/// Connection state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// Created, nothing attempted yet.
    New,
    /// Candidate checks in progress.
    Connecting,
    /// Media can flow.
    Connected,
    /// Connectivity lost.
    Disconnected,
    /// Connectivity could not be established.
    Failed,
    /// Closed locally.
    Closed,
}

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    /// Local offer.
    Offer,
    /// Remote answer.
    Answer,
}

/// A session description in SDP text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Offer or answer.
    pub kind: SdpType,
    /// SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    /// Build an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

/// State of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Declared, not yet open.
    Connecting,
    /// Messages can be sent.
    Open,
    /// Closed.
    Closed,
}

/// The ordered, reliable data channel used for JSON control messages.
pub trait ControlChannel: Send + Sync {
    /// Channel label.
    fn label(&self) -> &str;

    /// Current state.
    fn state(&self) -> ChannelState;

    /// Send one text frame. Fails unless the channel is open.
    fn send_text(&self, text: &str) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&self);
}

/// Asynchronous notifications raised by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The aggregate connection state changed.
    ConnectionState(PeerConnectionState),
    /// The control channel opened.
    ChannelOpen,
    /// The control channel closed.
    ChannelClosed,
    /// A text message arrived on the control channel.
    ChannelMessage(String),
    /// The remote voice stream arrived.
    RemoteTrack(RemoteAudio),
}

/// Callback through which a transport reports [`TransportEvent`]s.
#[derive(Clone)]
pub struct TransportEvents(Arc<dyn Fn(TransportEvent) + Send + Sync>);

impl TransportEvents {
    /// Wrap a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A sink that drops every event.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report an event.
    pub fn emit(&self, event: TransportEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransportEvents")
    }
}

/// Settings used to build a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// ICE discovery servers, e.g. `stun:stun.l.google.com:19302`.
    pub ice_servers: Vec<String>,
}

/// A peer connection to the remote speech service.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach a local track for sending.
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()>;

    /// Declare a receive-only audio transceiver for the remote voice.
    fn add_receive_only_audio(&self) -> Result<()>;

    /// Create the control channel. Must happen before the offer.
    fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>>;

    /// Create the local offer.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply the local description.
    async fn set_local_description(&self, description: &SessionDescription) -> Result<()>;

    /// Apply the remote answer.
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    /// Current aggregate connection state.
    fn connection_state(&self) -> PeerConnectionState;

    /// Close the connection and stop its I/O. Idempotent.
    fn close(&self);
}

/// Builds peer transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a fresh transport that reports through `events`.
    async fn create(
        &self,
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>>;
}
