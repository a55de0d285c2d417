//! Capability interfaces for capture, audio processing and playback.
//!
//! The session never touches a real device directly. Microphones, the audio
//! processing context and the speaker are reached through the traits in this
//! module so the state machine can run against in-memory implementations.
//!
//! Concrete implementations shipped here:
//! - [`PushDevices`] / [`PushSource`]: a capture source fed by the host
//!   application's own audio callback.
//! - [`SoftwareContext`]: a processing context with no device behind it.
//! - [`ChannelSink`]: a playback sink that forwards decoded remote audio to a
//!   channel and reports play/pause/end.

use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Audio sample rate used on the wire (Opus clock).
pub const WIRE_SAMPLE_RATE: u32 = 48_000;

/// Samples per 20 ms frame at [`WIRE_SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = 960;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Audio track.
    Audio,
    /// Video track.
    Video,
}

/// Lifecycle of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Producing media.
    Live,
    /// Stopped; never produces again.
    Ended,
}

/// A single local media track.
pub trait MediaTrack: Send + Sync {
    /// Track identifier.
    fn id(&self) -> &str;

    /// Track kind.
    fn kind(&self) -> MediaKind;

    /// Current lifecycle state.
    fn state(&self) -> TrackState;

    /// Stop the track. Idempotent.
    fn stop(&self);

    /// Next 20 ms frame of 48 kHz mono PCM queued for sending, if any.
    fn next_frame(&self) -> Option<Vec<i16>> {
        None
    }
}

/// A local capture stream (the microphone).
pub trait AudioSource: Send + Sync {
    /// All tracks of the stream.
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// Copy the most recent time-domain samples (`-1.0..=1.0`) into `out`,
    /// oldest first. Returns how many samples were written.
    fn read_waveform(&self, out: &mut [f32]) -> usize;

    /// Whether any track is still live.
    fn is_active(&self) -> bool {
        self.tracks().iter().any(|t| t.state() == TrackState::Live)
    }

    /// Stop every track.
    fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// State of an audio processing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created or suspended; not processing.
    Suspended,
    /// Processing audio.
    Running,
    /// Closed for good.
    Closed,
}

/// The audio processing context shared by level sensing and ambient effects.
#[async_trait]
pub trait ProcessingContext: Send + Sync {
    /// Current state.
    fn state(&self) -> ContextState;

    /// Output sample rate.
    fn sample_rate(&self) -> u32;

    /// Start (or restart) processing.
    async fn resume(&self) -> Result<()>;

    /// Pause processing. Suspending an already suspended context is a no-op.
    async fn suspend(&self) -> Result<()>;
}

/// Access to capture devices and processing contexts.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the microphone. Fails with [`RealtimeError::DeviceAccessDenied`]
    /// when permission is refused.
    async fn open_microphone(&self) -> Result<Arc<dyn AudioSource>>;

    /// Create a new, suspended processing context.
    async fn create_context(&self) -> Result<Arc<dyn ProcessingContext>>;
}

/// Native playback events of the remote audio sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Remote audio started playing.
    Play,
    /// Playback paused.
    Pause,
    /// Remote stream ended.
    Ended,
}

/// Callback through which a sink reports [`PlaybackEvent`]s.
#[derive(Clone)]
pub struct PlaybackEvents(Arc<dyn Fn(PlaybackEvent) + Send + Sync>);

impl PlaybackEvents {
    /// Wrap a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(PlaybackEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Report an event.
    pub fn emit(&self, event: PlaybackEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for PlaybackEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlaybackEvents")
    }
}

/// Remote voice stream handed out by the transport.
#[derive(Debug)]
pub struct RemoteAudio {
    /// Remote track/stream identifier.
    pub id: String,
    /// Decoded 48 kHz mono PCM frames. Closes when the remote stream ends.
    pub frames: mpsc::UnboundedReceiver<Vec<i16>>,
}

/// Where the remote voice is played.
pub trait AudioSink: Send + Sync {
    /// Attach a remote stream and start playing it.
    fn attach(&self, remote: RemoteAudio, events: PlaybackEvents);

    /// Stop playback and drop the attached stream. Idempotent.
    fn detach(&self);
}

// ── Push-fed capture ────────────────────────────────────────────────────

/// Capture track fed by the host application.
pub struct PushTrack {
    id: String,
    live: AtomicBool,
    waveform: Mutex<VecDeque<f32>>,
    waveform_capacity: usize,
    pending: Mutex<VecDeque<i16>>,
}

impl PushTrack {
    /// Longest backlog of unsent samples kept (one second).
    const MAX_PENDING: usize = WIRE_SAMPLE_RATE as usize;

    fn new(id: String, waveform_capacity: usize) -> Self {
        Self {
            id,
            live: AtomicBool::new(true),
            waveform: Mutex::new(VecDeque::with_capacity(waveform_capacity)),
            waveform_capacity,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Append captured 48 kHz mono samples. Ignored once stopped.
    pub fn push(&self, samples: &[i16]) {
        if !self.live.load(Ordering::Acquire) {
            return;
        }

        {
            let mut wave = self.waveform.lock();
            for &s in samples {
                if wave.len() == self.waveform_capacity {
                    wave.pop_front();
                }
                wave.push_back(s as f32 / i16::MAX as f32);
            }
        }

        let mut pending = self.pending.lock();
        pending.extend(samples.iter().copied());
        let overflow = pending.len().saturating_sub(Self::MAX_PENDING);
        if overflow > 0 {
            pending.drain(..overflow);
        }
    }
}

impl MediaTrack for PushTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn state(&self) -> TrackState {
        if self.live.load(Ordering::Acquire) { TrackState::Live } else { TrackState::Ended }
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            self.pending.lock().clear();
            self.waveform.lock().clear();
            tracing::debug!(track = %self.id, "Capture track stopped");
        }
    }

    fn next_frame(&self) -> Option<Vec<i16>> {
        let mut pending = self.pending.lock();
        if pending.len() < FRAME_SAMPLES {
            return None;
        }
        Some(pending.drain(..FRAME_SAMPLES).collect())
    }
}

/// A single-track microphone stream fed through [`PushTrack::push`].
pub struct PushSource {
    track: Arc<PushTrack>,
}

impl PushSource {
    /// Create a live source keeping `waveform_capacity` samples for level analysis.
    pub fn new(waveform_capacity: usize) -> Self {
        let id = format!("mic-{}", uuid::Uuid::new_v4());
        Self { track: Arc::new(PushTrack::new(id, waveform_capacity)) }
    }

    /// The capture track.
    pub fn track(&self) -> &Arc<PushTrack> {
        &self.track
    }

    /// Shorthand for `track().push(samples)`.
    pub fn push(&self, samples: &[i16]) {
        self.track.push(samples);
    }
}

impl AudioSource for PushSource {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![self.track.clone() as Arc<dyn MediaTrack>]
    }

    fn read_waveform(&self, out: &mut [f32]) -> usize {
        let wave = self.track.waveform.lock();
        let n = out.len().min(wave.len());
        let skip = wave.len() - n;
        for (dst, src) in out.iter_mut().zip(wave.iter().skip(skip)) {
            *dst = *src;
        }
        n
    }
}

/// [`MediaDevices`] handing out [`PushSource`]s and [`SoftwareContext`]s.
pub struct PushDevices {
    sample_rate: u32,
    waveform_capacity: usize,
    permitted: AtomicBool,
    active: Mutex<Option<Arc<PushSource>>>,
}

impl PushDevices {
    /// Create devices with the given context sample rate and analysis window.
    pub fn new(sample_rate: u32, waveform_capacity: usize) -> Self {
        Self {
            sample_rate,
            waveform_capacity,
            permitted: AtomicBool::new(true),
            active: Mutex::new(None),
        }
    }

    /// Grant or refuse microphone permission for subsequent opens.
    pub fn set_permission(&self, granted: bool) {
        self.permitted.store(granted, Ordering::Release);
    }

    /// The most recently opened source, while it is still live.
    pub fn active_source(&self) -> Option<Arc<PushSource>> {
        self.active.lock().as_ref().filter(|s| s.is_active()).cloned()
    }
}

#[async_trait]
impl MediaDevices for PushDevices {
    async fn open_microphone(&self) -> Result<Arc<dyn AudioSource>> {
        if !self.permitted.load(Ordering::Acquire) {
            return Err(RealtimeError::device("microphone permission refused"));
        }
        let source = Arc::new(PushSource::new(self.waveform_capacity));
        *self.active.lock() = Some(source.clone());
        Ok(source)
    }

    async fn create_context(&self) -> Result<Arc<dyn ProcessingContext>> {
        Ok(Arc::new(SoftwareContext::new(self.sample_rate)))
    }
}

// ── Software processing context ─────────────────────────────────────────

/// A processing context with no device; only tracks its own state.
#[derive(Debug)]
pub struct SoftwareContext {
    state: AtomicU8,
    sample_rate: u32,
}

impl SoftwareContext {
    const SUSPENDED: u8 = 0;
    const RUNNING: u8 = 1;
    const CLOSED: u8 = 2;

    /// Create a suspended context.
    pub fn new(sample_rate: u32) -> Self {
        Self { state: AtomicU8::new(Self::SUSPENDED), sample_rate }
    }

    /// Close the context permanently.
    pub fn close(&self) {
        self.state.store(Self::CLOSED, Ordering::Release);
    }
}

#[async_trait]
impl ProcessingContext for SoftwareContext {
    fn state(&self) -> ContextState {
        match self.state.load(Ordering::Acquire) {
            Self::RUNNING => ContextState::Running,
            Self::CLOSED => ContextState::Closed,
            _ => ContextState::Suspended,
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn resume(&self) -> Result<()> {
        self.state
            .compare_exchange(Self::SUSPENDED, Self::RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .or_else(|current| match current {
                Self::RUNNING => Ok(()),
                _ => Err(RealtimeError::context("context is closed")),
            })
    }

    async fn suspend(&self) -> Result<()> {
        let _ = self.state.compare_exchange(
            Self::RUNNING,
            Self::SUSPENDED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(())
    }
}

// ── Channel-backed playback ─────────────────────────────────────────────

/// [`AudioSink`] that forwards remote frames to a channel for the host to play.
///
/// Emits `Play` on the first frame after attach, `Ended` when the remote
/// stream closes and `Pause` on detach.
pub struct ChannelSink {
    output: mpsc::UnboundedSender<Vec<i16>>,
    pump: Mutex<Option<(JoinHandle<()>, PlaybackEvents)>>,
}

impl ChannelSink {
    /// Create a sink and the receiver the host drains into its speaker.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<i16>>) {
        let (output, rx) = mpsc::unbounded_channel();
        (Self { output, pump: Mutex::new(None) }, rx)
    }
}

impl AudioSink for ChannelSink {
    fn attach(&self, mut remote: RemoteAudio, events: PlaybackEvents) {
        self.detach();

        let output = self.output.clone();
        let pump_events = events.clone();
        let id = remote.id.clone();
        let handle = tokio::spawn(async move {
            let mut playing = false;
            while let Some(frame) = remote.frames.recv().await {
                if !playing {
                    playing = true;
                    pump_events.emit(PlaybackEvent::Play);
                }
                if output.send(frame).is_err() {
                    break;
                }
            }
            tracing::debug!(stream = %id, "Remote audio stream ended");
            pump_events.emit(PlaybackEvent::Ended);
        });

        *self.pump.lock() = Some((handle, events));
    }

    fn detach(&self) {
        if let Some((handle, events)) = self.pump.lock().take() {
            handle.abort();
            events.emit(PlaybackEvent::Pause);
        }
    }
}
