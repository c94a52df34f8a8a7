//! Application orchestration for the ConsoleCast daemon
//!
//! Starts the capture threads, runs the configured transport mode until
//! shutdown, then releases any consumer still waiting on a channel.

use crate::capture::{AudioProducer, VideoProducer, create_capture_source, spawn_capture_thread};
use crate::config::{AppConfig, TransportMode};
use crate::core::running::RunFlag;
use crate::core::types::StreamKind;
use crate::error::Result;
use crate::lifecycle::CaptureHub;
use crate::modes::{UsbMode, run_tcp_mode};
use crate::transport::serial::SerialPortDriver;
use crate::transport::usb::DeviceIdentity;
use log::{debug, info};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Main application structure that owns the capture pipeline
pub struct ConsoleCastApp {
    config: AppConfig,
    hub: Arc<CaptureHub>,
    running: RunFlag,
    capture_threads: Vec<JoinHandle<()>>,
}

impl ConsoleCastApp {
    /// Allocate the packet slots; nothing runs until [`ConsoleCastApp::run`]
    pub fn new(config: AppConfig) -> Self {
        info!("Initializing ConsoleCast");
        Self {
            config,
            hub: CaptureHub::new(),
            running: RunFlag::new(),
            capture_threads: Vec::new(),
        }
    }

    /// Shared running flag, for the signal handler
    pub fn running(&self) -> RunFlag {
        self.running.clone()
    }

    /// Shared capture hub, for the signal handler
    pub fn hub(&self) -> Arc<CaptureHub> {
        Arc::clone(&self.hub)
    }

    /// Request shutdown and wake every blocked consumer
    pub fn shutdown(&self) {
        self.running.stop();
        self.hub.force_unlock_all();
    }

    /// Start capture and serve clients until shutdown
    pub fn run(&mut self) -> Result<()> {
        self.start_capture_threads()?;

        let result = match self.config.daemon.mode {
            TransportMode::Usb => self.run_usb(),
            TransportMode::Tcp => run_tcp_mode(&self.hub, &self.config.network, &self.running),
        };

        self.shutdown();
        info!("ConsoleCast stopped");
        result
    }

    /// Capture threads are parked until a client connects and are never
    /// joined; they end with the process.
    fn start_capture_threads(&mut self) -> Result<()> {
        let capture = &self.config.capture;
        let stack_size = capture.thread_stack_size();

        let video = VideoProducer::new(
            Arc::clone(&self.hub),
            create_capture_source(capture, StreamKind::Video)?,
            capture.failure_policy,
        );
        self.capture_threads.push(spawn_capture_thread(video, stack_size)?);

        let audio = AudioProducer::new(
            Arc::clone(&self.hub),
            create_capture_source(capture, StreamKind::Audio)?,
        );
        self.capture_threads.push(spawn_capture_thread(audio, stack_size)?);

        info!(
            "Capture threads started (source: {}, failure policy: {:?})",
            capture.source, capture.failure_policy
        );
        Ok(())
    }

    fn run_usb(&self) -> Result<()> {
        let identity = DeviceIdentity::from_config(&self.config.usb);
        let driver = SerialPortDriver::from_config(&self.config.usb);
        let mut mode = UsbMode::new(Arc::clone(&self.hub), driver, self.running.clone());
        mode.run(&identity)
    }
}

impl Drop for ConsoleCastApp {
    fn drop(&mut self) {
        debug!(
            "ConsoleCastApp cleaning up ({} capture threads left parked)",
            self.capture_threads.len()
        );
        self.shutdown();
    }
}
