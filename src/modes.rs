//! Transport modes: who the daemon streams to and how sessions start/end.
//!
//! - **USB**: one session at a time over the device-serial channel. The host
//!   picks the streams with a request code.
//! - **TCP**: one server per stream on its own port, each accepting one client
//!   at a time. Video and audio sessions come and go independently.

use crate::config::NetworkConfig;
use crate::core::running::RunFlag;
use crate::core::types::StreamKind;
use crate::error::{Error, Result};
use crate::lifecycle::CaptureHub;
use crate::streaming::run_send_loop;
use crate::transport::socket::{self, SendPolicy, TcpSink};
use crate::transport::usb::{DeviceIdentity, DeviceSerialChannel, StreamRequest, UsbSerialDriver};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Accept poll interval while no client is attached
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Device-serial mode
pub struct UsbMode<D: UsbSerialDriver> {
    hub: Arc<CaptureHub>,
    channel: DeviceSerialChannel<D>,
    running: RunFlag,
}

impl<D: UsbSerialDriver> UsbMode<D> {
    pub fn new(hub: Arc<CaptureHub>, driver: D, running: RunFlag) -> Self {
        let channel = DeviceSerialChannel::new(driver, running.clone());
        Self {
            hub,
            channel,
            running,
        }
    }

    /// Bring the interface up and serve requests until shutdown
    pub fn run(&mut self, identity: &DeviceIdentity) -> Result<()> {
        self.channel.initialize(identity)?;
        log::info!("USB mode ready, waiting for host requests");

        while self.running.is_running() {
            let request = self.channel.wait_for_client_request();
            if request == StreamRequest::Failed {
                continue;
            }

            match self.serve(request) {
                Ok(delivered) => log::info!("USB session ended after {} packets", delivered),
                Err(e) => log::warn!("USB session ended: {}", e),
            }
        }

        log::info!("USB mode stopped");
        Ok(())
    }

    /// Run one session for an accepted request
    pub fn serve(&mut self, request: StreamRequest) -> Result<u64> {
        let streams = request.streams();
        log::info!("USB session started for {:?}", streams);

        self.hub.clear_pending_data();
        for &kind in streams {
            self.hub.on_client_connected(kind);
        }

        let result = run_send_loop(&self.hub, streams, &mut self.channel, &self.running);

        for &kind in streams {
            self.hub.on_client_disconnected(kind);
        }
        result
    }
}

/// TCP server for one stream
pub struct TcpStreamServer {
    kind: StreamKind,
    addr: Ipv4Addr,
    port: u16,
    hub: Arc<CaptureHub>,
    running: RunFlag,
    policy: SendPolicy,
}

impl TcpStreamServer {
    pub fn new(
        kind: StreamKind,
        addr: Ipv4Addr,
        port: u16,
        hub: Arc<CaptureHub>,
        running: RunFlag,
    ) -> Self {
        Self {
            kind,
            addr,
            port,
            hub,
            running,
            policy: SendPolicy::default(),
        }
    }

    /// Override the send retry budget
    pub fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accept and serve clients until shutdown.
    ///
    /// The listening socket is recreated whenever accept or a session fails
    /// with the network-down condition.
    pub fn run(&self) -> Result<()> {
        let mut listener = match socket::listen(self.addr, self.port, &self.running) {
            Ok(listener) => listener,
            Err(Error::ShuttingDown) => return Ok(()),
            Err(e) => return Err(e),
        };
        log::info!("{} server listening on {}:{}", self.kind, self.addr, self.port);

        while self.running.is_running() {
            let net_down = match socket::accept(&listener) {
                Ok(Some(stream)) => match self.serve(stream) {
                    Ok(delivered) => {
                        log::info!("{} session ended after {} packets", self.kind, delivered);
                        false
                    }
                    Err(e) => {
                        log::warn!("{} session ended: {}", self.kind, e);
                        e.is_net_down()
                    }
                },
                Ok(None) => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    false
                }
                Err(e) if socket::is_net_down(&e) => true,
                Err(e) => {
                    log::warn!("{} accept failed: {}", self.kind, e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    false
                }
            };

            if net_down {
                log::warn!("{} network went down, recreating listener", self.kind);
                listener = match self.relisten(listener) {
                    Ok(listener) => listener,
                    Err(Error::ShuttingDown) => break,
                    Err(e) => return Err(e),
                };
            }
        }

        log::info!("{} server stopped", self.kind);
        Ok(())
    }

    fn relisten(&self, old: TcpListener) -> Result<TcpListener> {
        drop(old);
        socket::listen(self.addr, self.port, &self.running)
    }

    /// Stream to one accepted client until it goes away
    pub fn serve(&self, stream: TcpStream) -> Result<u64> {
        self.hub.on_client_connected(self.kind);

        let mut sink = TcpSink::new(stream, self.running.clone(), self.policy);
        let result = run_send_loop(&self.hub, &[self.kind], &mut sink, &self.running);

        self.hub.on_client_disconnected(self.kind);
        result
    }
}

/// Serve both streams over TCP until shutdown
pub fn run_tcp_mode(
    hub: &Arc<CaptureHub>,
    network: &NetworkConfig,
    running: &RunFlag,
) -> Result<()> {
    let servers = [
        (StreamKind::Video, network.video_port),
        (StreamKind::Audio, network.audio_port),
    ];

    let mut handles = Vec::with_capacity(servers.len());
    for (kind, port) in servers {
        let server = TcpStreamServer::new(
            kind,
            network.bind_address,
            port,
            Arc::clone(hub),
            running.clone(),
        );
        let name = format!("{}-server", kind);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || server.run())
            .map_err(|source| Error::ThreadSpawn { name, source })?;
        handles.push((kind, handle));
    }

    let mut first_error = None;
    for (kind, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("{} server failed: {}", kind, e);
                first_error.get_or_insert(e);
            }
            Err(_) => {
                log::error!("{} server panicked", kind);
                first_error.get_or_insert(Error::Other(format!("{} server panicked", kind)));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
