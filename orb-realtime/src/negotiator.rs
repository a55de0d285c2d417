//! Transport negotiation: build a peer connection and complete one offer/answer round.

use crate::config::OrbConfig;
use crate::credential::SessionCredential;
use crate::error::{RealtimeError, Result};
use crate::media::AudioSource;
use crate::signaling::SdpExchange;
use crate::transport::{
    ControlChannel, PeerTransport, SessionDescription, TransportConfig, TransportEvents,
    TransportFactory,
};
use std::sync::Arc;
use std::time::Duration;

/// Live transport plus its control channel. Owned by the session driver.
#[derive(Clone)]
pub struct ConnectionHandles {
    /// The peer connection.
    pub transport: Arc<dyn PeerTransport>,
    /// The control channel created before the offer.
    pub channel: Arc<dyn ControlChannel>,
}

impl ConnectionHandles {
    /// Close the channel, then the transport.
    pub fn close(&self) {
        self.channel.close();
        self.transport.close();
    }
}

impl std::fmt::Debug for ConnectionHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandles")
            .field("state", &self.transport.connection_state())
            .field("channel", &self.channel.label())
            .finish()
    }
}

/// Performs transport setup and the single offer/answer exchange of an attempt.
pub struct Negotiator {
    factory: Arc<dyn TransportFactory>,
    exchange: Arc<dyn SdpExchange>,
    transport_config: TransportConfig,
    channel_label: String,
    timeout: Duration,
}

impl Negotiator {
    /// Create a negotiator.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        exchange: Arc<dyn SdpExchange>,
        config: &OrbConfig,
    ) -> Self {
        Self {
            factory,
            exchange,
            transport_config: TransportConfig { ice_servers: config.ice_servers.clone() },
            channel_label: config.channel_label.clone(),
            timeout: config.request_timeout,
        }
    }

    /// Negotiate a connection carrying `source`'s tracks.
    ///
    /// The credential is consumed. On failure every partially built piece is
    /// closed and the error is reported as [`RealtimeError::NegotiationFailed`]
    /// (or [`RealtimeError::ConfigError`] when no ICE server is configured).
    pub async fn negotiate(
        &self,
        credential: SessionCredential,
        source: &dyn AudioSource,
        events: TransportEvents,
    ) -> Result<ConnectionHandles> {
        if self.transport_config.ice_servers.is_empty() {
            return Err(RealtimeError::config("at least one ICE server is required"));
        }

        let transport = self
            .factory
            .create(&self.transport_config, events)
            .await
            .map_err(|e| e.during_negotiation("create transport"))?;

        let channel = match self.prepare(transport.as_ref(), source) {
            Ok(channel) => channel,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        let handles = ConnectionHandles { transport, channel };
        if let Err(e) = self.signal(handles.transport.as_ref(), credential).await {
            tracing::debug!(error = %e, "Negotiation failed, closing partial transport");
            handles.close();
            return Err(e);
        }

        tracing::debug!(label = %self.channel_label, "Negotiation complete");
        Ok(handles)
    }

    /// Attach local audio, declare the receive side and open the control channel.
    fn prepare(
        &self,
        transport: &dyn PeerTransport,
        source: &dyn AudioSource,
    ) -> Result<Arc<dyn ControlChannel>> {
        for track in source.tracks() {
            transport.add_track(track).map_err(|e| e.during_negotiation("attach local track"))?;
        }
        transport
            .add_receive_only_audio()
            .map_err(|e| e.during_negotiation("add receive-only audio"))?;
        transport
            .create_control_channel(&self.channel_label)
            .map_err(|e| e.during_negotiation("create control channel"))
    }

    /// Offer, exchange, answer.
    async fn signal(&self, transport: &dyn PeerTransport, credential: SessionCredential) -> Result<()> {
        let offer = transport
            .create_offer()
            .await
            .map_err(|e| e.during_negotiation("create offer"))?;
        transport
            .set_local_description(&offer)
            .await
            .map_err(|e| e.during_negotiation("set local description"))?;

        let answer = tokio::time::timeout(self.timeout, self.exchange.exchange(&credential, &offer.sdp))
            .await
            .map_err(|_| {
                RealtimeError::negotiation(format!("SDP exchange timed out after {:?}", self.timeout))
            })?
            .map_err(|e| e.during_negotiation("exchange"))?;
        drop(credential);

        transport
            .set_remote_description(&SessionDescription::answer(answer))
            .await
            .map_err(|e| e.during_negotiation("set remote description"))
    }
}
