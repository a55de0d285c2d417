//! In-memory fakes of the capability traits used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use orb_realtime::media::{
    AudioSink, AudioSource, MediaDevices, MediaTrack, PlaybackEvent, PlaybackEvents,
    ProcessingContext, PushSource, RemoteAudio, SoftwareContext,
};
use orb_realtime::transport::{
    ChannelState, ControlChannel, PeerConnectionState, PeerTransport, SessionDescription,
    TransportConfig, TransportEvent, TransportEvents, TransportFactory,
};
use orb_realtime::{
    ConnectionState, CredentialProvider, OrbConfig, RealtimeError, Result, SdpExchange,
    SessionCredential, SessionDeps, SfxConfig, VoiceSession,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

pub const ANSWER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\n";

// ── Devices ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDevices {
    pub deny_microphone: AtomicBool,
    pub fail_context: AtomicBool,
    sources: Mutex<Vec<Arc<PushSource>>>,
    contexts: Mutex<Vec<Arc<SoftwareContext>>>,
}

impl FakeDevices {
    pub fn sources(&self) -> Vec<Arc<PushSource>> {
        self.sources.lock().clone()
    }

    pub fn contexts(&self) -> Vec<Arc<SoftwareContext>> {
        self.contexts.lock().clone()
    }

    pub fn all_tracks_stopped(&self) -> bool {
        self.sources.lock().iter().all(|s| !s.is_active())
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open_microphone(&self) -> Result<Arc<dyn AudioSource>> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(RealtimeError::device("permission denied by user"));
        }
        let source = Arc::new(PushSource::new(256));
        self.sources.lock().push(source.clone());
        Ok(source)
    }

    async fn create_context(&self) -> Result<Arc<dyn ProcessingContext>> {
        let context = Arc::new(SoftwareContext::new(16_000));
        if self.fail_context.load(Ordering::SeqCst) {
            context.close();
        }
        self.contexts.lock().push(context.clone());
        Ok(context)
    }
}

// ── Credentials ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCredentials {
    failures: Mutex<Vec<RealtimeError>>,
    calls: AtomicUsize,
}

impl FakeCredentials {
    /// Fail the next `request_credential` calls with these errors, in order.
    pub fn fail_next(&self, error: RealtimeError) {
        self.failures.lock().push(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn request_credential(&self) -> Result<SessionCredential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock();
        if !failures.is_empty() {
            return Err(failures.remove(0));
        }
        Ok(SessionCredential::new(format!("ek_test_{n}"), format!("sess_{n}")))
    }
}

// ── Signaling ───────────────────────────────────────────────────────────

pub enum SignalingMode {
    Answer,
    Fail(RealtimeError),
    Hang,
    Gated,
}

pub struct FakeSignaling {
    mode: Mutex<SignalingMode>,
    gate: Notify,
    calls: AtomicUsize,
    secrets: Mutex<Vec<String>>,
}

impl Default for FakeSignaling {
    fn default() -> Self {
        Self {
            mode: Mutex::new(SignalingMode::Answer),
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
            secrets: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSignaling {
    pub fn set_mode(&self, mode: SignalingMode) {
        *self.mode.lock() = mode;
    }

    /// Let a gated exchange answer.
    pub fn open_gate(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn secrets(&self) -> Vec<String> {
        self.secrets.lock().clone()
    }
}

#[async_trait]
impl SdpExchange for FakeSignaling {
    async fn exchange(&self, credential: &SessionCredential, _offer_sdp: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.secrets.lock().push(credential.expose_secret().to_string());

        let (hang, gated, failure) = {
            let mode = self.mode.lock();
            match &*mode {
                SignalingMode::Answer => (false, false, None),
                SignalingMode::Fail(e) => (false, false, Some(e.clone())),
                SignalingMode::Hang => (true, false, None),
                SignalingMode::Gated => (false, true, None),
            }
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if gated {
            self.gate.notified().await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(ANSWER_SDP.to_string()),
        }
    }
}

// ── Transport ───────────────────────────────────────────────────────────

pub struct FakeChannel {
    label: String,
    state: Mutex<ChannelState>,
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ControlChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        if *self.state.lock() != ChannelState::Open {
            return Err(RealtimeError::webrtc("channel not open"));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ChannelState::Closed;
    }
}

pub struct FakeTransport {
    events: TransportEvents,
    pub ice_servers: Vec<String>,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
    receive_only: AtomicBool,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    offers: AtomicUsize,
    remote: Mutex<Option<SessionDescription>>,
    reject_remote: bool,
    closes: AtomicUsize,
    state: Mutex<PeerConnectionState>,
}

impl FakeTransport {
    pub fn emit(&self, event: TransportEvent) {
        if let TransportEvent::ConnectionState(state) = &event {
            *self.state.lock() = *state;
        }
        self.events.emit(event);
    }

    /// Open the control channel and report it.
    pub fn open_channel(&self) {
        if let Some(channel) = self.channel() {
            *channel.state.lock() = ChannelState::Open;
        }
        self.emit(TransportEvent::ChannelOpen);
    }

    /// Deliver a remote voice stream; returns the sender feeding it.
    pub fn deliver_remote_audio(&self) -> mpsc::UnboundedSender<Vec<i16>> {
        let (tx, frames) = mpsc::unbounded_channel();
        self.emit(TransportEvent::RemoteTrack(RemoteAudio { id: "remote-voice".into(), frames }));
        tx
    }

    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channel.lock().clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn has_receive_only_audio(&self) -> bool {
        self.receive_only.load(Ordering::SeqCst)
    }

    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn remote_applied(&self) -> bool {
        self.remote.lock().is_some()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closes() > 0
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()> {
        self.tracks.lock().push(track);
        Ok(())
    }

    fn add_receive_only_audio(&self) -> Result<()> {
        self.receive_only.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>> {
        assert_eq!(self.offers(), 0, "control channel must precede the offer");
        let channel = Arc::new(FakeChannel {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        let media = if self.has_receive_only_audio() { "m=audio\r\n" } else { "" };
        Ok(SessionDescription::offer(format!("v=0\r\no=- {n} 1 IN IP4 0.0.0.0\r\n{media}")))
    }

    async fn set_local_description(&self, _description: &SessionDescription) -> Result<()> {
        Ok(())
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        if self.reject_remote {
            return Err(RealtimeError::webrtc("answer rejected"));
        }
        *self.remote.lock() = Some(description.clone());
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = PeerConnectionState::Closed;
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub reject_remote: AtomicBool,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    max_live: AtomicUsize,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.transports.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.transports.lock().last().cloned()
    }

    /// Highest number of unclosed transports observed at creation time.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(FakeTransport {
            events,
            ice_servers: config.ice_servers.clone(),
            tracks: Mutex::new(Vec::new()),
            receive_only: AtomicBool::new(false),
            channel: Mutex::new(None),
            offers: AtomicUsize::new(0),
            remote: Mutex::new(None),
            reject_remote: self.reject_remote.load(Ordering::SeqCst),
            closes: AtomicUsize::new(0),
            state: Mutex::new(PeerConnectionState::New),
        });

        let mut transports = self.transports.lock();
        transports.push(transport.clone());
        let live = transports.iter().filter(|t| !t.is_closed()).count();
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(transport)
    }
}

// ── Sink ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSink {
    events: Mutex<Option<PlaybackEvents>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
}

impl FakeSink {
    pub fn emit(&self, event: PlaybackEvent) {
        let events = self.events.lock().clone();
        if let Some(events) = events {
            events.emit(event);
        }
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl AudioSink for FakeSink {
    fn attach(&self, _remote: RemoteAudio, events: PlaybackEvents) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = Some(events);
    }

    fn detach(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

pub struct Harness {
    pub session: VoiceSession,
    pub devices: Arc<FakeDevices>,
    pub credentials: Arc<FakeCredentials>,
    pub factory: Arc<FakeFactory>,
    pub signaling: Arc<FakeSignaling>,
    pub sink: Arc<FakeSink>,
}

pub fn test_config() -> OrbConfig {
    OrbConfig::default().with_sfx(SfxConfig::default().with_noise_seed(42))
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrbConfig) -> Self {
        let devices = Arc::new(FakeDevices::default());
        let credentials = Arc::new(FakeCredentials::default());
        let factory = Arc::new(FakeFactory::default());
        let signaling = Arc::new(FakeSignaling::default());
        let sink = Arc::new(FakeSink::default());

        let deps = SessionDeps {
            devices: devices.clone(),
            credentials: credentials.clone(),
            transports: factory.clone(),
            signaling: signaling.clone(),
            sink: sink.clone(),
        };
        let session = VoiceSession::new(config, deps).expect("valid test config");

        Self { session, devices, credentials, factory, signaling, sink }
    }

    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut state = self.session.signals().state;
        tokio::time::timeout(Duration::from_secs(30), state.wait_for(|s| *s == target))
            .await
            .unwrap_or_else(|_| panic!("state never became {target}"))
            .expect("driver alive");
    }

    /// Start, let negotiation finish, report the transport connected.
    pub async fn connect(&self) -> Arc<FakeTransport> {
        let before = self.factory.created();
        self.session.start().expect("start accepted");
        wait_until(|| {
            self.factory.created() > before
                && self.factory.last().is_some_and(|t| t.remote_applied())
        })
        .await;
        let transport = self.factory.last().expect("transport created");
        transport.emit(TransportEvent::ConnectionState(PeerConnectionState::Connected));
        self.wait_for_state(ConnectionState::Connected).await;
        transport
    }
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Let queued driver messages drain.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
