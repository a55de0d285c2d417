//! [`PeerTransport`] on top of `str0m`.
//!
//! `str0m` is Sans-IO: it never touches a socket. Each transport owns a UDP
//! socket and, once the answer is applied, a driver task that shuttles
//! datagrams, timeouts and outgoing audio in and out of the [`Rtc`] state
//! machine.

use super::opus::OpusCodec;
use super::stun;
use crate::error::{RealtimeError, Result};
use crate::media::{FRAME_SAMPLES, MediaTrack, RemoteAudio, WIRE_SAMPLE_RATE};
use crate::transport::{
    ChannelState, ControlChannel, PeerConnectionState, PeerTransport, SdpType, SessionDescription,
    TransportConfig, TransportEvent, TransportEvents, TransportFactory,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::channel::ChannelId;
use str0m::media::{Direction, Frequency, MediaKind, MediaTime, Mid, Pt};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// How long each STUN server gets to answer the binding probe.
const STUN_TIMEOUT: Duration = Duration::from_secs(2);

/// Audio pacing.
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Builds [`Str0mTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct Str0mTransportFactory;

impl Str0mTransportFactory {
    /// Create a factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for Str0mTransportFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| RealtimeError::webrtc(format!("UDP bind failed: {e}")))?;
        let port = socket
            .local_addr()
            .map_err(|e| RealtimeError::webrtc(format!("UDP local address: {e}")))?
            .port();
        let host = SocketAddr::new(outbound_ip(&config.ice_servers).await, port);

        let mut rtc = Rtc::new(Instant::now());
        let candidate = Candidate::host(host, "udp")
            .map_err(|e| RealtimeError::webrtc(format!("host candidate: {e}")))?;
        let _ = rtc.add_local_candidate(candidate);
        tracing::debug!(%host, "Added host candidate");

        for server in &config.ice_servers {
            match stun::probe(&socket, server, STUN_TIMEOUT).await {
                Ok(mapped) if mapped != host => {
                    match Candidate::server_reflexive(mapped, host, "udp") {
                        Ok(candidate) => {
                            let _ = rtc.add_local_candidate(candidate);
                            tracing::debug!(%mapped, server = %server, "Added server-reflexive candidate");
                        }
                        Err(e) => tracing::warn!(error = %e, "Rejected server-reflexive candidate"),
                    }
                    break;
                }
                Ok(_) => break,
                Err(e) => tracing::warn!(server = %server, error = %e, "STUN probe failed"),
            }
        }

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                rtc,
                codec: OpusCodec::new()?,
                local_track: None,
                receive_audio: false,
                channel_label: None,
                channel_id: None,
                channel_state: Arc::new(Mutex::new(ChannelState::Connecting)),
                audio_mid: None,
                pending: None,
                offer_sdp: None,
                send_params: None,
                rtp_offset: 0,
                remote_frames: None,
            }),
            socket,
            local_addr: host,
            state: Mutex::new(PeerConnectionState::New),
            events,
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            driver: Mutex::new(None),
        });

        Ok(Arc::new(Str0mTransport { shared }))
    }
}

/// Local address used to reach the first resolvable discovery server.
async fn outbound_ip(servers: &[String]) -> IpAddr {
    for server in servers {
        let Ok((host, port)) = stun::parse_stun_url(server) else {
            continue;
        };
        let Ok(mut addrs) = tokio::net::lookup_host((host.as_str(), port)).await else {
            continue;
        };
        let Some(target) = addrs.find(SocketAddr::is_ipv4) else {
            continue;
        };
        if let Ok(probe) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            if probe.connect(target).await.is_ok() {
                if let Ok(local) = probe.local_addr() {
                    return local.ip();
                }
            }
        }
    }
    tracing::warn!("No route to any discovery server, advertising loopback");
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

struct Inner {
    rtc: Rtc,
    codec: OpusCodec,
    local_track: Option<Arc<dyn MediaTrack>>,
    receive_audio: bool,
    channel_label: Option<String>,
    channel_id: Option<ChannelId>,
    channel_state: Arc<Mutex<ChannelState>>,
    audio_mid: Option<Mid>,
    pending: Option<SdpPendingOffer>,
    offer_sdp: Option<String>,
    send_params: Option<(Pt, Frequency)>,
    rtp_offset: u64,
    remote_frames: Option<mpsc::UnboundedSender<Vec<i16>>>,
}

struct Shared {
    inner: Mutex<Inner>,
    socket: UdpSocket,
    local_addr: SocketAddr,
    state: Mutex<PeerConnectionState>,
    events: TransportEvents,
    wake: Notify,
    closed: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, next: PeerConnectionState) -> Option<TransportEvent> {
        let mut state = self.state.lock();
        if *state == next || *state == PeerConnectionState::Closed {
            return None;
        }
        tracing::debug!(from = ?*state, to = ?next, "Peer connection state");
        *state = next;
        Some(TransportEvent::ConnectionState(next))
    }

    /// Drain `str0m` output: datagrams to send, events to raise, next deadline.
    fn poll(&self) -> Result<(Instant, Vec<(SocketAddr, Vec<u8>)>, Vec<TransportEvent>)> {
        let mut transmits = Vec::new();
        let mut raised = Vec::new();
        let mut inner = self.inner.lock();

        let deadline = loop {
            let output = inner
                .rtc
                .poll_output()
                .map_err(|e| RealtimeError::webrtc(format!("poll_output: {e}")))?;
            match output {
                Output::Timeout(deadline) => break deadline,
                Output::Transmit(t) => transmits.push((t.destination, t.contents.to_vec())),
                Output::Event(event) => self.on_event(&mut inner, event, &mut raised),
            }
        };

        Ok((deadline, transmits, raised))
    }

    fn on_event(&self, inner: &mut Inner, event: Event, raised: &mut Vec<TransportEvent>) {
        match event {
            Event::IceConnectionStateChange(ice) => {
                let mapped = match ice {
                    IceConnectionState::Checking => Some(PeerConnectionState::Connecting),
                    IceConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
                    _ => None,
                };
                raised.extend(mapped.and_then(|s| self.set_state(s)));
            }
            Event::Connected => raised.extend(self.set_state(PeerConnectionState::Connected)),
            Event::ChannelOpen(id, label) if Some(id) == inner.channel_id => {
                tracing::info!(label = %label, "Control channel open");
                *inner.channel_state.lock() = ChannelState::Open;
                raised.push(TransportEvent::ChannelOpen);
            }
            Event::ChannelClose(id) if Some(id) == inner.channel_id => {
                *inner.channel_state.lock() = ChannelState::Closed;
                raised.push(TransportEvent::ChannelClosed);
            }
            Event::ChannelData(data) if Some(data.id) == inner.channel_id => {
                if data.binary {
                    tracing::debug!(len = data.data.len(), "Binary control frame ignored");
                } else {
                    match String::from_utf8(data.data) {
                        Ok(text) => raised.push(TransportEvent::ChannelMessage(text)),
                        Err(e) => tracing::debug!(error = %e, "Non-UTF-8 control frame dropped"),
                    }
                }
            }
            Event::MediaData(data) if Some(data.mid) == inner.audio_mid => {
                let pcm = match inner.codec.decode(&data.data) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping undecodable audio packet");
                        return;
                    }
                };
                let frames = inner.remote_frames.get_or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    raised.push(TransportEvent::RemoteTrack(RemoteAudio {
                        id: data.mid.to_string(),
                        frames: rx,
                    }));
                    tx
                });
                let _ = frames.send(pcm);
            }
            _ => {}
        }
    }

    fn handle_input(&self, input: Input<'_>) -> Result<()> {
        self.inner
            .lock()
            .rtc
            .handle_input(input)
            .map_err(|e| RealtimeError::webrtc(format!("handle_input: {e}")))
    }

    fn receive(&self, source: SocketAddr, datagram: &[u8]) -> Result<()> {
        let Ok(contents) = datagram.try_into() else {
            tracing::trace!(%source, "Ignoring unrecognised datagram");
            return Ok(());
        };
        self.handle_input(Input::Receive(
            Instant::now(),
            Receive { proto: Protocol::Udp, source, destination: self.local_addr, contents },
        ))
    }

    /// Encode queued microphone frames onto the audio media line.
    fn pump_audio(&self) {
        if *self.state.lock() != PeerConnectionState::Connected {
            return;
        }
        let mut inner = self.inner.lock();
        let (Some(track), Some(mid), Some((pt, clock))) =
            (inner.local_track.clone(), inner.audio_mid, inner.send_params)
        else {
            return;
        };

        while let Some(frame) = track.next_frame() {
            let packet = match inner.codec.encode(&frame) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unencodable frame");
                    continue;
                }
            };
            let ticks = FRAME_SAMPLES as u64 * clock.get() as u64 / WIRE_SAMPLE_RATE as u64;
            let rtp_time = MediaTime::new(inner.rtp_offset, clock);
            inner.rtp_offset += ticks;

            let Some(writer) = inner.rtc.writer(mid) else {
                return;
            };
            if let Err(e) = writer.write(pt, Instant::now(), rtp_time, packet) {
                tracing::debug!(error = %e, "Audio write failed");
                return;
            }
        }
    }

    fn emit_all(&self, raised: Vec<TransportEvent>) {
        for event in raised {
            self.events.emit(event);
        }
    }
}

/// I/O driver: one iteration per timeout, datagram, audio tick or wake-up.
async fn drive(shared: Arc<Shared>) {
    let mut buf = vec![0u8; 2000];
    let mut audio_tick = tokio::time::interval(FRAME_DURATION);
    audio_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !shared.closed.load(Ordering::Acquire) {
        let (deadline, transmits, raised) = match shared.poll() {
            Ok(polled) => polled,
            Err(e) => {
                tracing::warn!(error = %e, "Transport failed");
                let failed = shared.set_state(PeerConnectionState::Failed);
                shared.emit_all(failed.into_iter().collect());
                break;
            }
        };
        shared.emit_all(raised);

        for (destination, datagram) in transmits {
            if let Err(e) = shared.socket.send_to(&datagram, destination).await {
                tracing::debug!(%destination, error = %e, "UDP send failed");
            }
        }

        let wait = deadline.saturating_duration_since(Instant::now());
        let step = tokio::select! {
            _ = tokio::time::sleep(wait) => shared.handle_input(Input::Timeout(Instant::now())),
            received = shared.socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => shared.receive(source, &buf[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "UDP receive failed");
                    Ok(())
                }
            },
            _ = audio_tick.tick() => {
                shared.pump_audio();
                Ok(())
            }
            _ = shared.wake.notified() => Ok(()),
        };

        if let Err(e) = step {
            tracing::debug!(error = %e, "Input rejected");
        }
    }

    tracing::debug!("Transport driver stopped");
}

/// A `str0m` peer connection with one audio line and one control channel.
pub struct Str0mTransport {
    shared: Arc<Shared>,
}

impl Str0mTransport {
    fn start_driver(&self) {
        let mut driver = self.shared.driver.lock();
        if driver.is_none() {
            *driver = Some(tokio::spawn(drive(self.shared.clone())));
        }
    }
}

#[async_trait]
impl PeerTransport for Str0mTransport {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.local_track.is_some() {
            return Err(RealtimeError::webrtc("only one local audio track is supported"));
        }
        inner.local_track = Some(track);
        Ok(())
    }

    fn add_receive_only_audio(&self) -> Result<()> {
        self.shared.inner.lock().receive_audio = true;
        Ok(())
    }

    fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>> {
        let mut inner = self.shared.inner.lock();
        if inner.channel_label.is_some() {
            return Err(RealtimeError::webrtc("control channel already created"));
        }
        inner.channel_label = Some(label.to_string());
        Ok(Arc::new(Str0mChannel {
            shared: self.shared.clone(),
            label: label.to_string(),
            state: inner.channel_state.clone(),
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut inner = self.shared.inner.lock();
        if inner.pending.is_some() {
            return Err(RealtimeError::webrtc("offer already created"));
        }

        // The local track and the remote voice share one audio line.
        let direction = match (inner.local_track.is_some(), inner.receive_audio) {
            (true, _) => Some(Direction::SendRecv),
            (false, true) => Some(Direction::RecvOnly),
            (false, false) => None,
        };
        let label = inner.channel_label.clone();

        let mut changes = inner.rtc.sdp_api();
        let mid = direction.map(|d| changes.add_media(MediaKind::Audio, d, None, None, None));
        let channel_id = label.map(|l| changes.add_channel(l));
        let (offer, pending) = changes
            .apply()
            .ok_or_else(|| RealtimeError::webrtc("no media or channel to offer"))?;

        let sdp = offer.to_sdp_string();
        inner.audio_mid = mid;
        inner.channel_id = channel_id;
        inner.pending = Some(pending);
        inner.offer_sdp = Some(sdp.clone());

        tracing::debug!(audio_mid = ?mid, channel_id = ?channel_id, "Generated local SDP offer");
        Ok(SessionDescription::offer(sdp))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        let inner = self.shared.inner.lock();
        match (&inner.offer_sdp, description.kind) {
            (Some(sdp), SdpType::Offer) if *sdp == description.sdp => Ok(()),
            _ => Err(RealtimeError::webrtc("local description does not match the created offer")),
        }
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        if description.kind != SdpType::Answer {
            return Err(RealtimeError::webrtc("remote description must be an answer"));
        }
        let answer = SdpAnswer::from_sdp_string(&description.sdp)
            .map_err(|e| RealtimeError::webrtc(format!("Failed to parse SDP answer: {e}")))?;

        {
            let mut inner = self.shared.inner.lock();
            let pending = inner
                .pending
                .take()
                .ok_or_else(|| RealtimeError::webrtc("no pending offer"))?;
            inner
                .rtc
                .sdp_api()
                .accept_answer(pending, answer)
                .map_err(|e| RealtimeError::webrtc(format!("Failed to apply SDP answer: {e}")))?;

            if let (Some(mid), true) = (inner.audio_mid, inner.local_track.is_some()) {
                let params = inner.rtc.writer(mid).and_then(|writer| {
                    writer.payload_params().next().map(|p| (p.pt(), p.spec().clock_rate))
                });
                match params {
                    Some(params) => inner.send_params = Some(params),
                    None => return Err(RealtimeError::webrtc("no payload type negotiated for audio")),
                }
            }
        }

        self.start_driver();
        tracing::info!("SDP handshake complete");
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.shared.state.lock()
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut inner = self.shared.inner.lock();
            inner.rtc.disconnect();
            inner.remote_frames = None;
            *inner.channel_state.lock() = ChannelState::Closed;
        }
        *self.shared.state.lock() = PeerConnectionState::Closed;
        self.shared.wake.notify_one();
        tracing::debug!("Transport closed");
    }
}

/// The control channel of a [`Str0mTransport`].
pub struct Str0mChannel {
    shared: Arc<Shared>,
    label: String,
    state: Arc<Mutex<ChannelState>>,
}

impl ControlChannel for Str0mChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        if self.state() != ChannelState::Open {
            return Err(RealtimeError::webrtc("control channel is not open"));
        }
        {
            let mut inner = self.shared.inner.lock();
            let id = inner
                .channel_id
                .ok_or_else(|| RealtimeError::webrtc("control channel not negotiated"))?;
            let mut channel = inner
                .rtc
                .channel(id)
                .ok_or_else(|| RealtimeError::webrtc("control channel not available"))?;
            channel
                .write(false, text.as_bytes())
                .map_err(|e| RealtimeError::webrtc(format!("Data channel write failed: {e}")))?;
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if *state != ChannelState::Closed {
            *state = ChannelState::Closed;
            tracing::debug!(label = %self.label, "Control channel closed");
        }
    }
}
