//! Synthesized ambient effects: brown-noise bed, monitor beep and connect chime.
//!
//! The engine is a pull renderer. The host's output callback calls
//! [`SfxEngine::render`] with a mono buffer at the context sample rate. The
//! mix is `(noise + beep + chime) * duck * master`, where the duck stage ramps
//! toward [`SfxConfig::duck_target`] while the model is speaking.

use crate::config::SfxConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

/// Length of the looped noise buffer.
const NOISE_SECONDS: f32 = 2.0;

/// Beep envelope: attack end, decay end, stop (seconds).
const BEEP_ATTACK: f32 = 0.02;
const BEEP_DECAY_END: f32 = 0.18;
const BEEP_STOP: f32 = 0.2;
const BEEP_FLOOR: f32 = 0.0001;

/// Connect chime: two tones (Hz, seconds), played back to back.
const CHIME_TONES: [(f32, f32); 2] = [(660.0, 0.12), (880.0, 0.18)];
const CHIME_GAIN: f32 = 0.15;

/// Linear gain ramp evaluated per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl GainRamp {
    /// A ramp resting at `value`.
    pub fn new(value: f32) -> Self {
        Self { current: value, target: value, step: 0.0, remaining: 0 }
    }

    /// Ramp linearly to `target` over `samples` samples (immediately when zero).
    pub fn ramp_to(&mut self, target: f32, samples: usize) {
        self.target = target;
        if samples == 0 {
            self.current = target;
            self.remaining = 0;
        } else {
            self.step = (target - self.current) / samples as f32;
            self.remaining = samples;
        }
    }

    /// Advance one sample and return the gain for it.
    pub fn next_gain(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 { self.target } else { self.current + self.step };
        }
        self.current
    }

    /// Current gain.
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Gain the ramp is heading to.
    pub fn target(&self) -> f32 {
        self.target
    }
}

/// Ambient effects renderer for one connection attempt.
pub struct SfxEngine {
    config: SfxConfig,
    sample_rate: f32,
    noise: Vec<f32>,
    noise_pos: usize,
    clock: u64,
    beep_period: u64,
    duck: GainRamp,
    duck_ramp_samples: usize,
    chime_pos: Option<usize>,
    active: bool,
}

impl SfxEngine {
    /// Build an engine rendering at `sample_rate`.
    pub fn new(sample_rate: u32, config: SfxConfig) -> Self {
        let rate = sample_rate.max(1) as f32;
        let mut rng = match config.noise_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let len = (rate * NOISE_SECONDS) as usize;
        let mut noise = Vec::with_capacity(len);
        let mut last = 0.0f32;
        for _ in 0..len {
            let x: f32 = rng.gen_range(-1.0..1.0);
            last = last * 0.98 + x * 0.02;
            noise.push(last);
        }

        let beep_period = ((config.beep_interval.as_secs_f32() * rate) as u64).max(1);
        let duck_ramp_samples = (config.duck_ramp.as_secs_f32() * rate) as usize;

        tracing::debug!(sample_rate, enabled = config.enabled, "Ambient effects created");

        Self {
            active: config.enabled,
            config,
            sample_rate: rate,
            noise,
            noise_pos: 0,
            clock: 0,
            beep_period,
            duck: GainRamp::new(1.0),
            duck_ramp_samples,
            chime_pos: None,
        }
    }

    /// Whether the engine still produces sound.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Current duck gain.
    pub fn duck_gain(&self) -> f32 {
        self.duck.value()
    }

    /// Duck while the model is speaking; restore otherwise.
    pub fn set_speaking(&mut self, speaking: bool) {
        let target = if speaking { self.config.duck_target } else { 1.0 };
        if (self.duck.target() - target).abs() > f32::EPSILON {
            self.duck.ramp_to(target, self.duck_ramp_samples);
        }
    }

    /// Schedule the connect chime, if enabled.
    pub fn play_connect_chime(&mut self) {
        if self.active && self.config.connect_chime {
            self.chime_pos = Some(0);
        }
    }

    /// Change the master volume, clamped to `[0, 1]`.
    pub fn set_master_volume(&mut self, volume: f32) {
        self.config.master_volume = volume.clamp(0.0, 1.0);
    }

    /// Stop producing sound for good.
    pub fn teardown(&mut self) {
        if self.active {
            self.active = false;
            self.chime_pos = None;
            tracing::debug!("Ambient effects torn down");
        }
    }

    /// Fill `out` with the next mono samples. Silent once torn down.
    pub fn render(&mut self, out: &mut [f32]) {
        if !self.active {
            out.fill(0.0);
            return;
        }

        for sample in out.iter_mut() {
            let bed = self.noise.get(self.noise_pos).copied().unwrap_or(0.0) * self.config.ambient_gain;
            self.noise_pos = (self.noise_pos + 1) % self.noise.len().max(1);

            let beep = self.beep_sample() * self.config.beep_gain;
            let chime = self.chime_sample();
            let duck = self.duck.next_gain();

            *sample = (bed + beep + chime) * duck * self.config.master_volume;
            self.clock += 1;
        }
    }

    fn beep_sample(&self) -> f32 {
        if self.clock < self.beep_period {
            return 0.0;
        }
        let t = (self.clock % self.beep_period) as f32 / self.sample_rate;
        if t >= BEEP_STOP {
            return 0.0;
        }
        beep_envelope(t) * (TAU * self.config.beep_frequency * t).sin()
    }

    fn chime_sample(&mut self) -> f32 {
        let Some(pos) = self.chime_pos else {
            return 0.0;
        };
        let mut t = pos as f32 / self.sample_rate;
        for (freq, len) in CHIME_TONES {
            if t < len {
                self.chime_pos = Some(pos + 1);
                let env = 1.0 - t / len;
                return CHIME_GAIN * env * (TAU * freq * t).sin();
            }
            t -= len;
        }
        self.chime_pos = None;
        0.0
    }
}

/// Beep envelope at `t` seconds into a beep: linear attack, exponential decay.
fn beep_envelope(t: f32) -> f32 {
    if t < BEEP_ATTACK {
        t / BEEP_ATTACK
    } else if t < BEEP_DECAY_END {
        let progress = (t - BEEP_ATTACK) / (BEEP_DECAY_END - BEEP_ATTACK);
        BEEP_FLOOR.powf(progress)
    } else if t < BEEP_STOP {
        BEEP_FLOOR
    } else {
        0.0
    }
}

impl std::fmt::Debug for SfxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SfxEngine")
            .field("sample_rate", &self.sample_rate)
            .field("active", &self.active)
            .field("duck", &self.duck.value())
            .finish()
    }
}
