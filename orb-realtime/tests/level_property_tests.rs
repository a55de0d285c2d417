//! Property-based tests for the microphone level and the orb view.
//!
//! **Property: Level Bounds**
//! *For any* waveform and non-negative gain, the computed level SHALL lie in
//! `[0, 1]`, and the derived orb geometry SHALL stay within its fixed range.

use orb_realtime::view::{BASE_DIAMETER, SPEAKING_BONUS};
use orb_realtime::{ConnectionState, OrbView, byte_waveform_level, rms_level};
use proptest::prelude::*;

fn arb_state() -> impl Strategy<Value = ConnectionState> {
    prop_oneof![
        Just(ConnectionState::Idle),
        Just(ConnectionState::Connecting),
        Just(ConnectionState::Connected),
        Just(ConnectionState::Error),
        Just(ConnectionState::Ended),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// **Property: Level Bounds** for float waveforms, including non-finite samples.
    #[test]
    fn prop_rms_level_is_bounded(
        samples in prop::collection::vec(any::<f32>(), 0..512),
        gain in 0.0f32..16.0,
    ) {
        let level = rms_level(&samples, gain);
        prop_assert!((0.0..=1.0).contains(&level), "level {} out of range", level);
    }

    /// **Property: Level Bounds** for unsigned byte waveforms.
    #[test]
    fn prop_byte_level_is_bounded(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let level = byte_waveform_level(&bytes, 4.0);
        prop_assert!((0.0..=1.0).contains(&level), "level {} out of range", level);
    }

    /// **Property: Louder is never smaller**
    /// Scaling a quiet waveform up never lowers its level.
    #[test]
    fn prop_level_is_monotonic_in_amplitude(
        samples in prop::collection::vec(-0.2f32..0.2, 1..256),
        factor in 1.0f32..4.0,
    ) {
        let quiet = rms_level(&samples, 4.0);
        let louder: Vec<f32> = samples.iter().map(|s| s * factor).collect();
        prop_assert!(rms_level(&louder, 4.0) + 1e-6 >= quiet);
    }

    /// **Property: View Geometry Bounds**
    /// Diameter and particle count follow the level and speaking flag within fixed limits.
    #[test]
    fn prop_view_geometry_is_bounded(
        state in arb_state(),
        level in any::<f32>(),
        speaking in any::<bool>(),
    ) {
        let view = OrbView::derive(state, level, speaking);
        let bonus = if speaking { SPEAKING_BONUS } else { 0 };
        prop_assert!(view.diameter >= BASE_DIAMETER + bonus);
        prop_assert!(view.diameter <= BASE_DIAMETER + 110 + bonus);
        prop_assert!(view.particle_target >= 140);
        prop_assert!(view.particle_target <= 330);
    }
}

#[test]
fn silence_is_zero() {
    assert_eq!(rms_level(&[0.0; 256], 4.0), 0.0);
    assert_eq!(byte_waveform_level(&[128; 256], 4.0), 0.0);
    assert_eq!(rms_level(&[], 4.0), 0.0);
}

#[test]
fn full_scale_saturates() {
    assert_eq!(rms_level(&[1.0, -1.0, 1.0, -1.0], 4.0), 1.0);
    assert_eq!(byte_waveform_level(&[0, 255, 0, 255], 4.0), 1.0);
}
