//! # orb-realtime
//!
//! Client side of a realtime voice session with a hosted speech-to-speech
//! model, plus the signals that drive an animated "orb" presentation.
//!
//! ## Architecture
//!
//! ```text
//!   start/stop ──► VoiceSession ──► driver task (Phase + reduce())
//!                                     │
//!        ┌────────────────────────────┼──────────────────────────┐
//!        │                            │                          │
//!  ┌─────▼──────┐   ┌─────────────────▼───┐   ┌──────────────────▼──┐
//!  │ MediaDevices│   │ CredentialProvider  │   │ Negotiator          │
//!  │ (mic, ctx)  │   │ (backend proxy)     │   │ (transport + SDP)   │
//!  └─────────────┘   └─────────────────────┘   └─────────────────────┘
//!        │                                               │
//!  LevelMeter ──► level        AudioSink ──► speaking ──► SfxEngine ducking
//! ```
//!
//! Every device, network and transport dependency sits behind a trait
//! ([`MediaDevices`], [`CredentialProvider`], [`TransportFactory`],
//! [`SdpExchange`], [`AudioSink`]) so the lifecycle runs unchanged against
//! in-memory fakes. The `webrtc` feature adds a `str0m` based transport.
//!
//! ## Example
//!
//! ```rust,ignore
//! use orb_realtime::{OrbConfig, VoiceSession, SessionDeps};
//!
//! let config = OrbConfig::from_env()?;
//! let session = VoiceSession::new(config, deps)?;
//! session.start()?;
//!
//! let mut state = session.signals().state;
//! while state.changed().await.is_ok() {
//!     println!("{}", session.view().status);
//! }
//! ```

pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod machine;
pub mod media;
pub mod negotiator;
pub mod sensors;
pub mod session;
pub mod sfx;
pub mod signaling;
pub mod transport;
pub mod view;

#[cfg(feature = "webrtc")]
pub mod webrtc;

// Re-exports
pub use config::{LevelConfig, OrbConfig, SfxConfig};
pub use credential::{CredentialProvider, HttpCredentialClient, SessionCredential};
pub use error::{RealtimeError, Result};
pub use events::{ClientEvent, ServerEvent};
pub use machine::{ConnectionState, Effect, Phase, SessionEvent, reduce};
pub use media::{
    AudioSink, AudioSource, ChannelSink, ContextState, MediaDevices, MediaTrack, PlaybackEvent,
    ProcessingContext, PushDevices, PushSource, SoftwareContext,
};
pub use negotiator::{ConnectionHandles, Negotiator};
pub use sensors::{LevelMeter, SpeakingFlag, byte_waveform_level, rms_level};
pub use session::{SessionDeps, SessionSignals, VoiceSession};
pub use sfx::SfxEngine;
pub use signaling::{HttpSdpExchange, SdpExchange};
pub use transport::{
    ControlChannel, PeerConnectionState, PeerTransport, SessionDescription, TransportEvent,
    TransportEvents, TransportFactory,
};
pub use view::{Control, OrbView};
