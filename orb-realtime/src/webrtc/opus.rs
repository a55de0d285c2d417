//! Opus transcoding for the voice media line (48 kHz mono, 20 ms frames).

use crate::error::{RealtimeError, Result};
use crate::media::{FRAME_SAMPLES, WIRE_SAMPLE_RATE};
use audiopus::coder::{Decoder, Encoder};
use audiopus::{Application, Channels, MutSignals, SampleRate};
use std::convert::TryFrom;

/// Upper bound for one encoded frame.
const MAX_OPUS_FRAME_BYTES: usize = 4000;

/// Largest decoded frame (120 ms at 48 kHz).
const MAX_DECODED_SAMPLES: usize = 5760;

/// Voice-tuned Opus encoder/decoder pair.
pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
}

impl OpusCodec {
    /// Create a 48 kHz mono codec in VoIP mode.
    pub fn new() -> Result<Self> {
        let rate = SampleRate::try_from(WIRE_SAMPLE_RATE as i32)
            .map_err(|e| RealtimeError::opus(format!("Invalid sample rate: {e}")))?;
        let encoder = Encoder::new(rate, Channels::Mono, Application::Voip)
            .map_err(|e| RealtimeError::opus(format!("Failed to create Opus encoder: {e}")))?;
        let decoder = Decoder::new(rate, Channels::Mono)
            .map_err(|e| RealtimeError::opus(format!("Failed to create Opus decoder: {e}")))?;
        Ok(Self { encoder, decoder })
    }

    /// Encode one frame of [`FRAME_SAMPLES`] samples.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != FRAME_SAMPLES {
            return Err(RealtimeError::opus(format!(
                "frame has {} samples, expected {FRAME_SAMPLES}",
                pcm.len()
            )));
        }
        let mut output = vec![0u8; MAX_OPUS_FRAME_BYTES];
        let len = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| RealtimeError::opus(format!("Opus encode failed: {e}")))?;
        output.truncate(len);
        Ok(output)
    }

    /// Decode one packet to PCM.
    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>> {
        let mut output = vec![0i16; MAX_DECODED_SAMPLES];
        let packet = audiopus::packet::Packet::try_from(packet)
            .map_err(|e| RealtimeError::opus(format!("Invalid Opus packet: {e}")))?;
        let signals = MutSignals::try_from(output.as_mut_slice())
            .map_err(|e| RealtimeError::opus(format!("Failed to create output buffer: {e}")))?;
        let decoded = self
            .decoder
            .decode(Some(packet), signals, false)
            .map_err(|e| RealtimeError::opus(format!("Opus decode failed: {e}")))?;
        output.truncate(decoded);
        Ok(output)
    }
}
