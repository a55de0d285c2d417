//! # orb-telemetry
//!
//! Structured logging setup shared by voice orb binaries and demos.
//!
//! ```rust
//! use orb_telemetry::{info, init_telemetry};
//!
//! init_telemetry("voice-orb").expect("telemetry");
//! info!(attempt = "demo", "session starting");
//! ```

pub mod init;

// Re-export tracing macros for convenience
pub use tracing::{Span, debug, error, info, instrument, trace, warn};

pub use init::{DEFAULT_FILTER, init_json_telemetry, init_telemetry};
