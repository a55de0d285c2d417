//! # Voice Orb Example
//!
//! Runs a full voice session against a credential proxy and the realtime
//! negotiation endpoint, printing the orb view whenever the state changes.
//!
//! There is no sound card integration here: a synthetic tone is pushed into
//! the microphone source and remote voice frames are only counted.
//!
//! ## Prerequisites
//!
//! 1. A credential proxy answering `POST` with `{"secret": "...", "id": "..."}`.
//! 2. `cmake` installed (required by `audiopus`).
//!
//! ## Environment Variables
//!
//! | Variable              | Required | Description                               |
//! |-----------------------|----------|-------------------------------------------|
//! | `ORB_CREDENTIAL_URL`  | No       | Proxy endpoint (default localhost:3000)   |
//! | `ORB_REALTIME_URL`    | No       | Negotiation endpoint                      |
//! | `ORB_MODEL`           | No       | Model name sent with the offer            |
//! | `ORB_ICE_SERVERS`     | No       | Comma separated `stun:` URLs              |
//! | `ORB_DEMO_SECONDS`    | No       | How long to stay connected (default 30)   |
//! | `RUST_LOG`            | No       | Log filter, e.g. `orb_realtime=debug`     |
//!
//! ## Running
//!
//! ```sh
//! cargo run -p orb-realtime --example voice_orb --features webrtc
//! ```

use orb_realtime::media::PushDevices;
use orb_realtime::webrtc::Str0mTransportFactory;
use orb_realtime::{
    ChannelSink, ConnectionState, HttpCredentialClient, HttpSdpExchange, OrbConfig, SessionDeps,
    VoiceSession,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    orb_telemetry::init_telemetry("voice-orb")?;

    // --- 1. Configuration and capabilities ---
    let config = OrbConfig::from_env()?;
    let seconds: u64 = std::env::var("ORB_DEMO_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    let devices = Arc::new(PushDevices::new(48_000, config.level.window));
    let (sink, mut playback) = ChannelSink::new();
    let deps = SessionDeps {
        devices: devices.clone(),
        credentials: Arc::new(HttpCredentialClient::from_config(&config)?),
        transports: Arc::new(Str0mTransportFactory::new()),
        signaling: Arc::new(HttpSdpExchange::from_config(&config)?),
        sink: Arc::new(sink),
    };

    let session = VoiceSession::new(config, deps)?;
    let mut transitions = session.transitions();

    // --- 2. Synthetic microphone: 20 ms frames of a quiet 220 Hz tone ---
    let mic_devices = devices.clone();
    tokio::spawn(async move {
        let mut phase = 0.0f32;
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        loop {
            ticker.tick().await;
            if let Some(source) = mic_devices.active_source() {
                let frame: Vec<i16> = (0..960)
                    .map(|_| {
                        phase = (phase + 220.0 / 48_000.0).fract();
                        ((phase * std::f32::consts::TAU).sin() * 4000.0) as i16
                    })
                    .collect();
                source.push(&frame);
            }
        }
    });

    // --- 3. Count remote voice frames ---
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    tokio::spawn(async move {
        while playback.recv().await.is_some() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    // --- 4. Start and follow the state ---
    println!("{}", session.view().control.label());
    session.start()?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut stopping = false;
    loop {
        tokio::select! {
            state = transitions.recv() => {
                let Ok(state) = state else { break };
                let view = session.view();
                println!(
                    "[{state}] status={} orb={}px particles={} control=\"{}\"",
                    view.status,
                    view.diameter,
                    view.particle_target,
                    view.control.label(),
                );
                if let Some(error) = session.signals().error.borrow().as_ref() {
                    eprintln!("Error: {error}");
                }
                if matches!(state, ConnectionState::Error | ConnectionState::Ended) {
                    break;
                }
            }
            _ = &mut deadline, if !stopping => {
                println!("Ending session after {seconds}s");
                stopping = true;
                session.stop()?;
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                session.stop()?;
            }
        }
    }

    // --- 5. Clean up ---
    println!("Remote voice frames received: {}", received.load(Ordering::Relaxed));
    if session.view().follow_up {
        println!("Thanks for talking! Start another session any time.");
    }
    session.shutdown().await;
    Ok(())
}
