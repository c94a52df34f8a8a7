//! ConsoleCast - on-device capture and streaming daemon
//!
//! Pulls encoded video and PCM audio from a capture service, frames each unit
//! with a 16-byte header and hands it to a transport (USB device-serial
//! channel or TCP) for delivery to a receiving host.
//!
//! Capture threads and transports meet in a single-slot rendezvous per
//! stream, so at most one unit of media per stream is ever in flight.

pub mod app;
pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod lifecycle;
pub mod modes;
pub mod streaming;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use lifecycle::CaptureHub;
