//! WebRTC transport built on `str0m` (Sans-IO) and `audiopus`.
//!
//! Enable with the `webrtc` cargo feature. Building `audiopus` requires
//! `cmake`; with cmake >= 4.0 set `CMAKE_POLICY_VERSION_MINIMUM=3.5`.

pub mod opus;
pub mod stun;
pub mod transport;

pub use opus::OpusCodec;
pub use transport::{Str0mChannel, Str0mTransport, Str0mTransportFactory};
