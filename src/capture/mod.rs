//! Capture side of the pipeline: capture services and the per-stream
//! capture threads that feed the shared packet slots.

pub mod framing;
pub mod mock;
pub mod service;
pub mod synthetic;
pub mod worker;

pub use framing::{FailurePolicy, VideoFraming};
pub use service::{CaptureService, Transfer};
pub use synthetic::create_capture_source;
pub use worker::{AudioProducer, StreamProducer, VideoProducer, spawn_capture_thread};
