//! Session lifecycle reducer.
//!
//! Every transition goes through [`reduce`], which returns the next phase and
//! the effects the driver must run. Events carry the attempt id they belong
//! to; events from a superseded attempt are ignored.

use crate::transport::PeerConnectionState;
use uuid::Uuid;

/// Externally visible connection state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// An attempt is in flight.
    Connecting,
    /// Transport up and negotiation settled.
    Connected,
    /// The last attempt failed.
    Error,
    /// The user ended the session.
    Ended,
}

impl ConnectionState {
    /// Whether a new attempt may start from here.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Error | Self::Ended)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Internal phase. The authoritative session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Connecting {
        attempt: Uuid,
        /// Capture, context, credential and negotiation all succeeded.
        negotiated: bool,
        /// Transport already reported `connected`.
        transport_connected: bool,
        channel_open: bool,
        stop_requested: bool,
    },
    Connected {
        attempt: Uuid,
        channel_open: bool,
        greeting_sent: bool,
    },
    Error {
        message: String,
    },
    Ended,
}

impl Phase {
    /// The public state this phase maps to.
    pub fn connection_state(&self) -> ConnectionState {
        match self {
            Phase::Idle => ConnectionState::Idle,
            Phase::Connecting { .. } => ConnectionState::Connecting,
            Phase::Connected { .. } => ConnectionState::Connected,
            Phase::Error { .. } => ConnectionState::Error,
            Phase::Ended => ConnectionState::Ended,
        }
    }

    /// Id of the attempt this phase belongs to, if one is live.
    pub fn attempt(&self) -> Option<Uuid> {
        match self {
            Phase::Connecting { attempt, .. } | Phase::Connected { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }
}

/// Inputs to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// User asked to start.
    Start,
    /// User asked to stop.
    Stop,
    /// The attempt's setup steps all succeeded.
    Negotiated { attempt: Uuid },
    /// A setup step (or a later step of the attempt) failed.
    AttemptFailed { attempt: Uuid, message: String },
    /// The transport changed connection state.
    PeerState { attempt: Uuid, state: PeerConnectionState },
    /// The control channel opened.
    ChannelOpened { attempt: Uuid },
    /// The control channel closed.
    ChannelClosed { attempt: Uuid },
}

/// Work the driver performs after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run capture, context, credential and negotiation for a new attempt.
    BeginAttempt { attempt: Uuid },
    /// The attempt just became connected.
    Activate { attempt: Uuid },
    /// Send the initial `response.create` message.
    SendGreeting { attempt: Uuid },
    /// Release every resource of the attempt.
    Release { attempt: Uuid },
    /// Publish the new connection state.
    Emit,
}

/// Reducer: `(phase, event) -> (next_phase, effects)`.
pub fn reduce(phase: &Phase, event: SessionEvent) -> (Phase, Vec<Effect>) {
    use Effect::*;
    use SessionEvent::*;

    let current = phase.attempt();
    let matches = |id: Uuid| current == Some(id);

    match (phase, event) {
        // -----------------
        // Start / Stop
        // -----------------
        (Phase::Idle | Phase::Error { .. } | Phase::Ended, Start) => {
            let attempt = Uuid::new_v4();
            (
                Phase::Connecting {
                    attempt,
                    negotiated: false,
                    transport_connected: false,
                    channel_open: false,
                    stop_requested: false,
                },
                vec![BeginAttempt { attempt }, Emit],
            )
        }
        (Phase::Connecting { .. } | Phase::Connected { .. }, Start) => (phase.clone(), vec![]),

        (Phase::Connecting { attempt, negotiated: true, .. }, Stop) => {
            (Phase::Ended, vec![Release { attempt: *attempt }, Emit])
        }
        (Phase::Connecting { attempt, negotiated: false, transport_connected, channel_open, .. }, Stop) => (
            Phase::Connecting {
                attempt: *attempt,
                negotiated: false,
                transport_connected: *transport_connected,
                channel_open: *channel_open,
                stop_requested: true,
            },
            vec![],
        ),
        (Phase::Connected { attempt, .. }, Stop) => {
            (Phase::Ended, vec![Release { attempt: *attempt }, Emit])
        }
        (Phase::Idle | Phase::Error { .. } | Phase::Ended, Stop) => (phase.clone(), vec![]),

        // -----------------
        // Attempt settlement
        // -----------------
        (
            Phase::Connecting { attempt, transport_connected, channel_open, stop_requested, .. },
            Negotiated { attempt: id },
        ) if matches(id) => {
            if *stop_requested {
                (Phase::Ended, vec![Release { attempt: *attempt }, Emit])
            } else if *transport_connected {
                enter_connected(*attempt, *channel_open)
            } else {
                (
                    Phase::Connecting {
                        attempt: *attempt,
                        negotiated: true,
                        transport_connected: false,
                        channel_open: *channel_open,
                        stop_requested: false,
                    },
                    vec![],
                )
            }
        }

        (
            Phase::Connecting { attempt, .. } | Phase::Connected { attempt, .. },
            AttemptFailed { attempt: id, message },
        ) if matches(id) => (Phase::Error { message }, vec![Release { attempt: *attempt }, Emit]),

        // -----------------
        // Transport lifecycle
        // -----------------
        (
            Phase::Connecting { attempt, negotiated, channel_open, stop_requested, .. },
            PeerState { attempt: id, state: PeerConnectionState::Connected },
        ) if matches(id) => {
            if *negotiated && !*stop_requested {
                enter_connected(*attempt, *channel_open)
            } else {
                (
                    Phase::Connecting {
                        attempt: *attempt,
                        negotiated: *negotiated,
                        transport_connected: true,
                        channel_open: *channel_open,
                        stop_requested: *stop_requested,
                    },
                    vec![],
                )
            }
        }

        (
            Phase::Connecting { attempt, .. } | Phase::Connected { attempt, .. },
            PeerState { attempt: id, state: state @ (PeerConnectionState::Failed | PeerConnectionState::Disconnected) },
        ) if matches(id) => (
            Phase::Error { message: format!("transport {}", peer_state_name(state)) },
            vec![Release { attempt: *attempt }, Emit],
        ),

        // -----------------
        // Control channel
        // -----------------
        (
            Phase::Connecting { attempt, negotiated, transport_connected, stop_requested, .. },
            ChannelOpened { attempt: id },
        ) if matches(id) => (
            Phase::Connecting {
                attempt: *attempt,
                negotiated: *negotiated,
                transport_connected: *transport_connected,
                channel_open: true,
                stop_requested: *stop_requested,
            },
            vec![],
        ),
        (Phase::Connected { attempt, greeting_sent, .. }, ChannelOpened { attempt: id }) if matches(id) => {
            let effects = if *greeting_sent { vec![] } else { vec![SendGreeting { attempt: *attempt }] };
            (
                Phase::Connected { attempt: *attempt, channel_open: true, greeting_sent: true },
                effects,
            )
        }

        (
            Phase::Connecting { attempt, negotiated, transport_connected, stop_requested, .. },
            ChannelClosed { attempt: id },
        ) if matches(id) => (
            Phase::Connecting {
                attempt: *attempt,
                negotiated: *negotiated,
                transport_connected: *transport_connected,
                channel_open: false,
                stop_requested: *stop_requested,
            },
            vec![],
        ),
        (Phase::Connected { attempt, greeting_sent, .. }, ChannelClosed { attempt: id }) if matches(id) => (
            Phase::Connected { attempt: *attempt, channel_open: false, greeting_sent: *greeting_sent },
            vec![],
        ),

        // Stale ids, terminal phases and uninteresting peer states.
        (_, event) => {
            tracing::trace!(?event, phase = ?phase.connection_state(), "Event ignored");
            (phase.clone(), vec![])
        }
    }
}

fn enter_connected(attempt: Uuid, channel_open: bool) -> (Phase, Vec<Effect>) {
    let mut effects = vec![Effect::Activate { attempt }];
    if channel_open {
        effects.push(Effect::SendGreeting { attempt });
    }
    effects.push(Effect::Emit);
    (Phase::Connected { attempt, channel_open, greeting_sent: channel_open }, effects)
}

fn peer_state_name(state: PeerConnectionState) -> &'static str {
    match state {
        PeerConnectionState::New => "new",
        PeerConnectionState::Connecting => "connecting",
        PeerConnectionState::Connected => "connected",
        PeerConnectionState::Disconnected => "disconnected",
        PeerConnectionState::Failed => "failed",
        PeerConnectionState::Closed => "closed",
    }
}
