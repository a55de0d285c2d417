//! Presentation model derived from session signals.
//!
//! Pure functions only; drawing is left to the host UI.

use crate::machine::ConnectionState;
use std::time::Duration;

/// Smallest orb diameter (silence).
pub const BASE_DIAMETER: u32 = 180;
/// Extra diameter at full level.
pub const LEVEL_DIAMETER: f32 = 110.0;
/// Extra diameter while the model speaks.
pub const SPEAKING_BONUS: u32 = 10;

/// The start/end control shown under the orb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// "Start session", enabled.
    Start,
    /// "Connecting…", disabled.
    Connecting,
    /// "End session", enabled.
    End,
}

impl Control {
    /// Whether the control accepts input.
    pub fn enabled(self) -> bool {
        !matches!(self, Control::Connecting)
    }

    /// Button text.
    pub fn label(self) -> &'static str {
        match self {
            Control::Start => "Start session",
            Control::Connecting => "Connecting…",
            Control::End => "End session",
        }
    }
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbView {
    /// Orb diameter in logical pixels.
    pub diameter: u32,
    /// Number of particles the field should converge to.
    pub particle_target: u32,
    /// Spoken status text.
    pub status: &'static str,
    /// Control to show.
    pub control: Control,
    /// Show the follow-up call to action.
    pub follow_up: bool,
    /// Full revolution time of the swirl layers.
    pub spin_period: Duration,
}

impl OrbView {
    /// Derive the view from state, microphone level (`0..=1`) and the speaking flag.
    pub fn derive(state: ConnectionState, level: f32, speaking: bool) -> Self {
        let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };

        let mut diameter = BASE_DIAMETER + (level * LEVEL_DIAMETER).round() as u32;
        if speaking {
            diameter += SPEAKING_BONUS;
        }

        let particle_target =
            (140.0 + level * 90.0 + if speaking { 100.0 } else { 0.0 }).round() as u32;

        let status = match state {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected if speaking => "Speaking",
            ConnectionState::Connected => "Listening",
            ConnectionState::Error => "Error",
            ConnectionState::Ended => "Ended",
        };

        let control = match state {
            ConnectionState::Idle | ConnectionState::Error | ConnectionState::Ended => Control::Start,
            ConnectionState::Connecting => Control::Connecting,
            ConnectionState::Connected => Control::End,
        };

        Self {
            diameter,
            particle_target,
            status,
            control,
            follow_up: state == ConnectionState::Ended,
            spin_period: Duration::from_secs(if speaking { 8 } else { 16 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_level_and_speaking() {
        let quiet = OrbView::derive(ConnectionState::Connected, 0.0, false);
        assert_eq!(quiet.diameter, 180);
        assert_eq!(quiet.particle_target, 140);
        assert_eq!(quiet.status, "Listening");

        let loud = OrbView::derive(ConnectionState::Connected, 1.0, true);
        assert_eq!(loud.diameter, 300);
        assert_eq!(loud.particle_target, 330);
        assert_eq!(loud.status, "Speaking");
        assert_eq!(loud.spin_period, Duration::from_secs(8));

        let half = OrbView::derive(ConnectionState::Connected, 0.5, false);
        assert_eq!(half.diameter, 235);
        assert_eq!(half.particle_target, 185);
    }

    #[test]
    fn out_of_range_level_is_clamped() {
        assert_eq!(OrbView::derive(ConnectionState::Idle, 7.0, false).diameter, 290);
        assert_eq!(OrbView::derive(ConnectionState::Idle, f32::NAN, false).diameter, 180);
    }

    #[test]
    fn controls_per_state() {
        let cases = [
            (ConnectionState::Idle, Control::Start, "Idle"),
            (ConnectionState::Connecting, Control::Connecting, "Connecting"),
            (ConnectionState::Connected, Control::End, "Listening"),
            (ConnectionState::Error, Control::Start, "Error"),
            (ConnectionState::Ended, Control::Start, "Ended"),
        ];
        for (state, control, status) in cases {
            let view = OrbView::derive(state, 0.0, false);
            assert_eq!(view.control, control);
            assert_eq!(view.status, status);
            assert_eq!(view.follow_up, state == ConnectionState::Ended);
        }
        assert!(!Control::Connecting.enabled());
    }
}
