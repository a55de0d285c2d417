//! Microphone level and remote speaking signals.

use crate::config::LevelConfig;
use crate::media::{AudioSource, ContextState, PlaybackEvent, ProcessingContext};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// RMS of `samples`, scaled by `gain` and clamped to `[0, 1]`.
///
/// Empty or non-finite input yields `0.0`.
pub fn rms_level(samples: &[f32], gain: f32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    clamp_level((sum / samples.len() as f32).sqrt() * gain)
}

/// Level of an unsigned 8-bit waveform (128 = silence), as produced by byte analysers.
pub fn byte_waveform_level(bytes: &[u8], gain: f32) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }
    let sum: f32 = bytes
        .iter()
        .map(|&b| {
            let v = (b as f32 - 128.0) / 128.0;
            v * v
        })
        .sum();
    clamp_level((sum / bytes.len() as f32).sqrt() * gain)
}

fn clamp_level(level: f32) -> f32 {
    if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 }
}

/// Periodic sampler publishing the microphone level.
///
/// Runs on its own interval task; stops and publishes `0.0` once the source
/// goes inactive or the context leaves `Running`.
pub struct LevelMeter {
    handle: Option<JoinHandle<()>>,
    level: watch::Sender<f32>,
}

impl LevelMeter {
    /// Create a stopped meter publishing to `level`.
    pub fn new(level: watch::Sender<f32>) -> Self {
        Self { handle: None, level }
    }

    /// Start sampling. Restarts if already running.
    pub fn start(
        &mut self,
        source: Arc<dyn AudioSource>,
        context: Arc<dyn ProcessingContext>,
        config: &LevelConfig,
    ) {
        self.stop();

        let level = self.level.clone();
        let interval = config.frame_interval;
        let gain = config.gain;
        let mut window = vec![0.0f32; config.window];

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !source.is_active() || context.state() != ContextState::Running {
                    break;
                }
                let n = source.read_waveform(&mut window);
                level.send_replace(rms_level(&window[..n], gain));
            }
            level.send_replace(0.0);
            tracing::debug!("Level meter stopped");
        }));
    }

    /// Whether the sampling task is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop sampling and publish `0.0`. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.level.send_replace(0.0);
    }
}

impl Drop for LevelMeter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// "Model is speaking" flag driven by playback events.
#[derive(Debug, Clone)]
pub struct SpeakingFlag {
    tx: watch::Sender<bool>,
}

impl SpeakingFlag {
    /// Wrap a watch sender.
    pub fn new(tx: watch::Sender<bool>) -> Self {
        Self { tx }
    }

    /// Apply a playback event. Returns the new value when it changed.
    pub fn apply(&self, event: PlaybackEvent) -> Option<bool> {
        let speaking = matches!(event, PlaybackEvent::Play);
        self.set(speaking).then_some(speaking)
    }

    /// Force the flag. Returns whether the value changed.
    pub fn set(&self, speaking: bool) -> bool {
        self.tx.send_if_modified(|current| {
            let changed = *current != speaking;
            *current = speaking;
            changed
        })
    }

    /// Current value.
    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }
}
