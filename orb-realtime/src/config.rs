//! Configuration types for voice sessions.

use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default credential proxy endpoint, relative to the hosting app.
pub const DEFAULT_CREDENTIAL_URL: &str = "http://localhost:3000/api/realtime/session";

/// Realtime negotiation endpoint (the model is passed as a query parameter).
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Default speech-to-speech model.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Public STUN server used for candidate discovery.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label of the control data channel. The remote service requires this exact name.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Microphone level sensor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    /// Sampling cadence (one display frame at 60 Hz by default).
    #[serde(with = "duration_ms")]
    pub frame_interval: Duration,
    /// Number of time-domain samples inspected per tick.
    pub window: usize,
    /// RMS multiplier applied before clamping to `[0, 1]`.
    pub gain: f32,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self { frame_interval: Duration::from_millis(16), window: 256, gain: 4.0 }
    }
}

/// Ambient sound effect settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SfxConfig {
    /// Whether ambient effects are synthesized at all.
    pub enabled: bool,
    /// Output gain, `0.0..=1.0`.
    pub master_volume: f32,
    /// Gain of the brown-noise bed.
    pub ambient_gain: f32,
    /// Gain of the periodic monitor beep.
    pub beep_gain: f32,
    /// Beep pitch in Hz.
    pub beep_frequency: f32,
    /// Time between beeps.
    #[serde(with = "duration_ms")]
    pub beep_interval: Duration,
    /// Duck gain applied while the model is speaking.
    pub duck_target: f32,
    /// Duration of the linear duck ramp.
    #[serde(with = "duration_ms")]
    pub duck_ramp: Duration,
    /// Play a short synthesized chime on connect.
    pub connect_chime: bool,
    /// Seed for the noise generator; random when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_seed: Option<u64>,
}

impl Default for SfxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            master_volume: 0.3,
            ambient_gain: 0.05,
            beep_gain: 0.02,
            beep_frequency: 980.0,
            beep_interval: Duration::from_secs(3),
            duck_target: 0.4,
            duck_ramp: Duration::from_millis(50),
            connect_chime: true,
            noise_seed: None,
        }
    }
}

impl SfxConfig {
    /// Config with effects switched off.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Default::default() }
    }

    /// Set the master volume.
    pub fn with_master_volume(mut self, volume: f32) -> Self {
        self.master_volume = volume;
        self
    }

    /// Use a fixed noise seed (deterministic output).
    pub fn with_noise_seed(mut self, seed: u64) -> Self {
        self.noise_seed = Some(seed);
        self
    }
}

/// Configuration for a voice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbConfig {
    /// Credential proxy endpoint (`POST`, empty body).
    pub credential_url: String,
    /// Realtime negotiation endpoint.
    pub realtime_url: String,
    /// Model requested during negotiation.
    pub model: String,
    /// ICE discovery servers (`stun:host:port`).
    pub ice_servers: Vec<String>,
    /// Control channel label.
    pub channel_label: String,
    /// Timeout applied to each outbound HTTP call.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Microphone level sensor.
    #[serde(default)]
    pub level: LevelConfig,
    /// Ambient effects.
    #[serde(default)]
    pub sfx: SfxConfig,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            credential_url: DEFAULT_CREDENTIAL_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            channel_label: CONTROL_CHANNEL_LABEL.to_string(),
            request_timeout: Duration::from_secs(15),
            level: LevelConfig::default(),
            sfx: SfxConfig::default(),
        }
    }
}

impl OrbConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `ORB_*` environment variables onto the defaults.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `ORB_CREDENTIAL_URL` | `credential_url` |
    /// | `ORB_REALTIME_URL` | `realtime_url` |
    /// | `ORB_MODEL` | `model` |
    /// | `ORB_ICE_SERVERS` | `ice_servers` (comma separated) |
    /// | `ORB_REQUEST_TIMEOUT_MS` | `request_timeout` |
    /// | `ORB_SFX_ENABLED` | `sfx.enabled` |
    /// | `ORB_SFX_VOLUME` | `sfx.master_volume` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`OrbConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ORB_CREDENTIAL_URL") {
            config.credential_url = url;
        }
        if let Some(url) = lookup("ORB_REALTIME_URL") {
            config.realtime_url = url;
        }
        if let Some(model) = lookup("ORB_MODEL") {
            config.model = model;
        }
        if let Some(servers) = lookup("ORB_ICE_SERVERS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ms) = lookup("ORB_REQUEST_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| RealtimeError::config(format!("ORB_REQUEST_TIMEOUT_MS: {e}")))?;
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(flag) = lookup("ORB_SFX_ENABLED") {
            config.sfx.enabled = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(volume) = lookup("ORB_SFX_VOLUME") {
            config.sfx.master_volume = volume
                .parse()
                .map_err(|e| RealtimeError::config(format!("ORB_SFX_VOLUME: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        if self.ice_servers.is_empty() {
            return Err(RealtimeError::config("at least one ICE server is required"));
        }
        if self.channel_label.is_empty() {
            return Err(RealtimeError::config("control channel label must not be empty"));
        }
        if self.level.window == 0 {
            return Err(RealtimeError::config("level window must be non-zero"));
        }
        if self.level.frame_interval.is_zero() {
            return Err(RealtimeError::config("level frame interval must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.sfx.master_volume) {
            return Err(RealtimeError::config(format!(
                "sfx master volume {} outside 0..=1",
                self.sfx.master_volume
            )));
        }
        url::Url::parse(&self.realtime_url)
            .map_err(|e| RealtimeError::config(format!("realtime_url: {e}")))?;
        url::Url::parse(&self.credential_url)
            .map_err(|e| RealtimeError::config(format!("credential_url: {e}")))?;
        Ok(())
    }

    /// Set the credential proxy endpoint.
    pub fn with_credential_url(mut self, url: impl Into<String>) -> Self {
        self.credential_url = url.into();
        self
    }

    /// Set the realtime negotiation endpoint.
    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the ICE server list.
    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the level sensor configuration.
    pub fn with_level(mut self, level: LevelConfig) -> Self {
        self.level = level;
        self
    }

    /// Set the ambient effects configuration.
    pub fn with_sfx(mut self, sfx: SfxConfig) -> Self {
        self.sfx = sfx;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_validate() {
        let config = OrbConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice_servers, vec![DEFAULT_ICE_SERVER.to_string()]);
        assert_eq!(config.channel_label, "oai-events");
    }

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("ORB_MODEL", "gpt-realtime"),
            ("ORB_ICE_SERVERS", "stun:a.example:3478, stun:b.example:3478"),
            ("ORB_REQUEST_TIMEOUT_MS", "2500"),
            ("ORB_SFX_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let config = OrbConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.model, "gpt-realtime");
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1], "stun:b.example:3478");
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert!(!config.sfx.enabled);
    }

    #[test]
    fn rejects_empty_ice_servers() {
        let err = OrbConfig::from_lookup(|k| (k == "ORB_ICE_SERVERS").then(|| " , ".to_string()))
            .unwrap_err();
        assert!(matches!(err, RealtimeError::ConfigError(_)));
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let config = OrbConfig::default().with_sfx(SfxConfig::default().with_master_volume(1.5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_level_interval() {
        let level = LevelConfig { frame_interval: Duration::ZERO, ..LevelConfig::default() };
        let err = OrbConfig::default().with_level(level).validate().unwrap_err();
        assert!(matches!(err, RealtimeError::ConfigError(ref m) if m.contains("frame interval")));

        let mut json = serde_json::to_value(OrbConfig::default()).unwrap();
        json["level"]["frame_interval"] = serde_json::json!(0);
        let config: OrbConfig = serde_json::from_value(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn serde_roundtrip_uses_millis() {
        let json = serde_json::to_value(OrbConfig::default()).unwrap();
        assert_eq!(json["request_timeout"], 15000);
        assert_eq!(json["level"]["frame_interval"], 16);
        let back: OrbConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, OrbConfig::default());
    }
}
