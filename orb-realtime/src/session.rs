//! Voice session driver.
//!
//! [`VoiceSession`] owns one driver task. The driver holds the authoritative
//! [`Phase`], every resource of the live attempt, and consumes a single queue
//! of user commands, transport events, playback events and attempt
//! settlements. Attempt setup runs in its own task and hands what it acquired
//! back through the queue, so a slow network step never blocks stop handling.

use crate::config::OrbConfig;
use crate::credential::CredentialProvider;
use crate::error::{RealtimeError, Result};
use crate::events::{ClientEvent, ServerEvent};
use crate::machine::{ConnectionState, Effect, Phase, SessionEvent, reduce};
use crate::media::{
    AudioSink, AudioSource, MediaDevices, PlaybackEvent, PlaybackEvents, ProcessingContext,
    RemoteAudio,
};
use crate::negotiator::{ConnectionHandles, Negotiator};
use crate::sensors::{LevelMeter, SpeakingFlag};
use crate::sfx::SfxEngine;
use crate::signaling::SdpExchange;
use crate::transport::{TransportEvent, TransportEvents, TransportFactory};
use crate::view::OrbView;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capabilities a session runs against.
#[derive(Clone)]
pub struct SessionDeps {
    /// Microphone and processing context.
    pub devices: Arc<dyn MediaDevices>,
    /// Session credential source.
    pub credentials: Arc<dyn CredentialProvider>,
    /// Peer transport construction.
    pub transports: Arc<dyn TransportFactory>,
    /// Offer/answer exchange.
    pub signaling: Arc<dyn SdpExchange>,
    /// Remote voice playback.
    pub sink: Arc<dyn AudioSink>,
}

/// Observable session outputs.
#[derive(Debug, Clone)]
pub struct SessionSignals {
    /// Current connection state.
    pub state: watch::Receiver<ConnectionState>,
    /// Microphone level in `[0, 1]`.
    pub level: watch::Receiver<f32>,
    /// Whether the model is speaking.
    pub speaking: watch::Receiver<bool>,
    /// Message of the last failure; cleared when a new attempt starts.
    pub error: watch::Receiver<Option<String>>,
}

impl SessionSignals {
    /// Derive the presentation model from the current signal values.
    pub fn view(&self) -> OrbView {
        OrbView::derive(*self.state.borrow(), *self.level.borrow(), *self.speaking.borrow())
    }
}

enum DriverMessage {
    Event(SessionEvent),
    Settled { attempt: Uuid, acquired: Acquired, outcome: Result<()> },
    ControlMessage { attempt: Uuid, text: String },
    RemoteTrack { attempt: Uuid, remote: RemoteAudio },
    Playback { attempt: Uuid, event: PlaybackEvent },
    Shutdown,
}

/// Resources acquired by one attempt.
#[derive(Default)]
struct Acquired {
    source: Option<Arc<dyn AudioSource>>,
    context: Option<Arc<dyn ProcessingContext>>,
    handles: Option<ConnectionHandles>,
}

impl Acquired {
    /// Stop capture, close the connection, suspend the context.
    async fn release(self) {
        if let Some(source) = &self.source {
            source.stop_all();
        }
        if let Some(handles) = &self.handles {
            handles.close();
        }
        if let Some(context) = &self.context {
            if let Err(e) = context.suspend().await {
                tracing::debug!(error = %e, "Context suspend failed during release");
            }
        }
    }
}

/// A realtime voice session.
///
/// Must be created inside a Tokio runtime.
pub struct VoiceSession {
    commands: mpsc::UnboundedSender<DriverMessage>,
    signals: SessionSignals,
    transitions: broadcast::Sender<ConnectionState>,
    sfx: Arc<Mutex<Option<SfxEngine>>>,
    driver: JoinHandle<()>,
}

impl VoiceSession {
    /// Validate `config` and spawn the driver.
    pub fn new(config: OrbConfig, deps: SessionDeps) -> Result<Self> {
        config.validate()?;

        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let (level_tx, level) = watch::channel(0.0f32);
        let (speaking_tx, speaking) = watch::channel(false);
        let (error_tx, error) = watch::channel(None);
        let (transitions, _) = broadcast::channel(64);
        let sfx = Arc::new(Mutex::new(None));

        let negotiator = Arc::new(Negotiator::new(
            deps.transports.clone(),
            deps.signaling.clone(),
            &config,
        ));

        let driver = Driver {
            config,
            deps,
            negotiator,
            phase: Phase::Idle,
            tx: commands.downgrade(),
            current: None,
            level_meter: LevelMeter::new(level_tx),
            speaking: SpeakingFlag::new(speaking_tx),
            state_tx,
            error_tx,
            transitions: transitions.clone(),
            sfx: sfx.clone(),
        };
        let driver = tokio::spawn(driver.run(rx));

        Ok(Self {
            commands,
            signals: SessionSignals { state, level, speaking, error },
            transitions,
            sfx,
            driver,
        })
    }

    /// Begin a connection attempt.
    ///
    /// Rejected with [`RealtimeError::AttemptInProgress`] while connecting or connected.
    pub fn start(&self) -> Result<()> {
        if !self.state().can_start() {
            return Err(RealtimeError::AttemptInProgress);
        }
        self.send(DriverMessage::Event(SessionEvent::Start))
    }

    /// End the session. A no-op when nothing is active.
    pub fn stop(&self) -> Result<()> {
        self.send(DriverMessage::Event(SessionEvent::Stop))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.signals.state.borrow()
    }

    /// Signal receivers.
    pub fn signals(&self) -> SessionSignals {
        self.signals.clone()
    }

    /// Every state change, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Current presentation model.
    pub fn view(&self) -> OrbView {
        self.signals.view()
    }

    /// Render ambient effects into `out`. Silence when no engine is live.
    pub fn render_sfx(&self, out: &mut [f32]) {
        match self.sfx.lock().as_mut() {
            Some(engine) => engine.render(out),
            None => out.fill(0.0),
        }
    }

    /// Change the ambient effects volume of the live engine.
    pub fn set_sfx_volume(&self, volume: f32) {
        if let Some(engine) = self.sfx.lock().as_mut() {
            engine.set_master_volume(volume);
        }
    }

    /// Release everything and stop the driver.
    pub async fn shutdown(self) {
        let _ = self.commands.send(DriverMessage::Shutdown);
        if let Err(e) = self.driver.await {
            tracing::debug!(error = %e, "Session driver ended abnormally");
        }
    }

    fn send(&self, message: DriverMessage) -> Result<()> {
        self.commands.send(message).map_err(|_| RealtimeError::SessionClosed)
    }
}

struct Driver {
    config: OrbConfig,
    deps: SessionDeps,
    negotiator: Arc<Negotiator>,
    phase: Phase,
    tx: mpsc::WeakUnboundedSender<DriverMessage>,
    current: Option<(Uuid, Acquired)>,
    level_meter: LevelMeter,
    speaking: SpeakingFlag,
    state_tx: watch::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<String>>,
    transitions: broadcast::Sender<ConnectionState>,
    sfx: Arc<Mutex<Option<SfxEngine>>>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DriverMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                DriverMessage::Event(event) => self.dispatch(event).await,
                DriverMessage::Settled { attempt, acquired, outcome } => {
                    self.settle(attempt, acquired, outcome).await
                }
                DriverMessage::ControlMessage { attempt, text } => {
                    self.on_control_message(attempt, &text)
                }
                DriverMessage::RemoteTrack { attempt, remote } => self.on_remote_track(attempt, remote),
                DriverMessage::Playback { attempt, event } => self.on_playback(attempt, event),
                DriverMessage::Shutdown => break,
            }
        }

        if let Some((attempt, _)) = &self.current {
            let attempt = *attempt;
            self.release(attempt).await;
        }
        tracing::debug!("Session driver stopped");
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        let (next, effects) = reduce(&self.phase, event);
        if next.connection_state() != self.phase.connection_state() {
            tracing::info!(
                from = %self.phase.connection_state(),
                to = %next.connection_state(),
                attempt = ?next.attempt().or(self.phase.attempt()),
                "Session state changed"
            );
        }
        self.phase = next;

        for effect in effects {
            self.run_effect(effect).await;
        }
    }

    async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::BeginAttempt { attempt } => self.begin_attempt(attempt),
            Effect::Activate { attempt } => {
                tracing::info!(attempt = %attempt, "Voice session connected");
                if let Some(engine) = self.sfx.lock().as_mut() {
                    engine.play_connect_chime();
                }
            }
            Effect::SendGreeting { attempt } => self.send_greeting(attempt),
            Effect::Release { attempt } => self.release(attempt).await,
            Effect::Emit => self.emit(),
        }
    }

    fn emit(&self) {
        let state = self.phase.connection_state();
        match &self.phase {
            Phase::Error { message } => {
                self.error_tx.send_replace(Some(message.clone()));
            }
            Phase::Connecting { .. } => {
                self.error_tx.send_replace(None);
            }
            _ => {}
        }
        self.state_tx.send_replace(state);
        let _ = self.transitions.send(state);
    }

    fn begin_attempt(&self, attempt: Uuid) {
        tracing::debug!(attempt = %attempt, "Starting connection attempt");

        let devices = self.deps.devices.clone();
        let credentials = self.deps.credentials.clone();
        let negotiator = self.negotiator.clone();
        let events = self.transport_events(attempt);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut acquired = Acquired::default();
            let outcome = async {
                let source = devices.open_microphone().await?;
                acquired.source = Some(source.clone());
                tracing::debug!(attempt = %attempt, "Microphone acquired");

                let context = devices.create_context().await?;
                acquired.context = Some(context.clone());
                context.resume().await?;

                let credential = credentials.request_credential().await?;
                let handles = negotiator.negotiate(credential, source.as_ref(), events).await?;
                acquired.handles = Some(handles);
                Ok::<(), RealtimeError>(())
            }
            .await;

            if let Err(e) = &outcome {
                tracing::warn!(attempt = %attempt, error = %e, "Connection attempt failed");
            }

            match tx.upgrade() {
                Some(tx) => {
                    if let Err(mpsc::error::SendError(message)) =
                        tx.send(DriverMessage::Settled { attempt, acquired, outcome })
                    {
                        if let DriverMessage::Settled { acquired, .. } = message {
                            acquired.release().await;
                        }
                    }
                }
                None => acquired.release().await,
            }
        });
    }

    async fn settle(&mut self, attempt: Uuid, acquired: Acquired, outcome: Result<()>) {
        if self.phase.attempt() != Some(attempt) {
            tracing::debug!(attempt = %attempt, "Releasing resources of superseded attempt");
            acquired.release().await;
            return;
        }

        match outcome {
            Ok(()) => {
                if let (Some(source), Some(context)) = (&acquired.source, &acquired.context) {
                    self.level_meter.start(source.clone(), context.clone(), &self.config.level);
                    if self.config.sfx.enabled {
                        let engine = SfxEngine::new(context.sample_rate(), self.config.sfx.clone());
                        *self.sfx.lock() = Some(engine);
                    }
                }
                self.current = Some((attempt, acquired));
                self.dispatch(SessionEvent::Negotiated { attempt }).await;
            }
            Err(e) => {
                self.current = Some((attempt, acquired));
                self.dispatch(SessionEvent::AttemptFailed { attempt, message: e.to_string() })
                    .await;
            }
        }
    }

    async fn release(&mut self, attempt: Uuid) {
        self.level_meter.stop();

        match self.current.take() {
            Some((owner, acquired)) if owner == attempt => {
                acquired.release().await;
                tracing::debug!(attempt = %attempt, "Attempt resources released");
            }
            other => self.current = other,
        }

        self.deps.sink.detach();
        if let Some(mut engine) = self.sfx.lock().take() {
            engine.teardown();
        }
        self.speaking.set(false);
    }

    fn send_greeting(&self, attempt: Uuid) {
        let Some((_, acquired)) = self.current.as_ref().filter(|(owner, _)| *owner == attempt) else {
            return;
        };
        let Some(handles) = &acquired.handles else {
            return;
        };

        let sent = ClientEvent::greeting()
            .to_wire()
            .and_then(|wire| handles.channel.send_text(&wire));
        match sent {
            Ok(()) => tracing::debug!(attempt = %attempt, "Greeting sent"),
            Err(e) => tracing::warn!(attempt = %attempt, error = %e, "Greeting not sent"),
        }
    }

    fn on_control_message(&self, attempt: Uuid, text: &str) {
        if self.phase.attempt() != Some(attempt) {
            return;
        }
        match ServerEvent::parse(text) {
            Some(ServerEvent::Error { error }) => {
                tracing::warn!(message = %error.message, code = ?error.code, "Remote service error")
            }
            Some(ServerEvent::SessionCreated { .. }) => tracing::debug!("Remote session created"),
            Some(ServerEvent::ResponseDone { .. }) => tracing::debug!("Response done"),
            Some(ServerEvent::Other) => tracing::trace!(len = text.len(), "Control message"),
            None => tracing::debug!(len = text.len(), "Unparseable control message dropped"),
        }
    }

    fn on_remote_track(&self, attempt: Uuid, remote: RemoteAudio) {
        if self.phase.attempt() != Some(attempt) {
            return;
        }
        tracing::debug!(attempt = %attempt, stream = %remote.id, "Remote audio attached");

        let tx = self.tx.clone();
        let events = PlaybackEvents::new(move |event| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(DriverMessage::Playback { attempt, event });
            }
        });
        self.deps.sink.attach(remote, events);
    }

    fn on_playback(&self, attempt: Uuid, event: PlaybackEvent) {
        if self.phase.attempt() != Some(attempt) {
            return;
        }
        if let Some(speaking) = self.speaking.apply(event) {
            tracing::debug!(speaking, "Speaking changed");
            if let Some(engine) = self.sfx.lock().as_mut() {
                engine.set_speaking(speaking);
            }
        }
    }

    fn transport_events(&self, attempt: Uuid) -> TransportEvents {
        let tx = self.tx.clone();
        TransportEvents::new(move |event| {
            let message = match event {
                TransportEvent::ConnectionState(state) => {
                    DriverMessage::Event(SessionEvent::PeerState { attempt, state })
                }
                TransportEvent::ChannelOpen => {
                    DriverMessage::Event(SessionEvent::ChannelOpened { attempt })
                }
                TransportEvent::ChannelClosed => {
                    DriverMessage::Event(SessionEvent::ChannelClosed { attempt })
                }
                TransportEvent::ChannelMessage(text) => DriverMessage::ControlMessage { attempt, text },
                TransportEvent::RemoteTrack(remote) => DriverMessage::RemoteTrack { attempt, remote },
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(message);
            }
        })
    }
}
