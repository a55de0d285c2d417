//! Subscriber initialization

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize console logging for a voice orb binary.
///
/// Honours `RUST_LOG`; falls back to `info`. Safe to call more than once,
/// only the first call installs a subscriber.
///
/// # Example
/// ```
/// orb_telemetry::init_telemetry("voice-orb-demo").expect("telemetry");
/// ```
pub fn init_telemetry(service_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut outcome = Ok(());
    INIT.call_once(|| {
        outcome = tracing_subscriber::registry()
            .with(env_filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()
            .map_err(|e| e.to_string());

        if outcome.is_ok() {
            tracing::info!(service.name = service_name, "Telemetry initialized");
        }
    });

    outcome.map_err(Into::into)
}

/// Initialize newline-delimited JSON logging, for log shippers.
pub fn init_json_telemetry(service_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut outcome = Ok(());
    INIT.call_once(|| {
        outcome = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
            .map_err(|e| e.to_string());

        if outcome.is_ok() {
            tracing::info!(service.name = service_name, format = "json", "Telemetry initialized");
        }
    });

    outcome.map_err(Into::into)
}
