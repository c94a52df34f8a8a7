//! Device-serial transport: a vendor-class USB interface with a tiny
//! request/response handshake.
//!
//! After attaching, the host sends one 4-byte little-endian request code
//! naming the stream(s) it wants. The device answers with a continuous
//! sequence of framed packets and never replies to a rejected request.

use crate::config::UsbConfig;
use crate::core::running::RunFlag;
use crate::core::types::StreamKind;
use crate::error::{Error, Result};
use crate::streaming::PacketSink;
use parking_lot::Mutex;
use std::fs;
use std::thread;
use std::time::Duration;

/// Host asks for the video stream only
pub const REQUEST_VIDEO: u32 = 1;
/// Host asks for the audio stream only
pub const REQUEST_AUDIO: u32 = 2;
/// Host asks for both streams
pub const REQUEST_BOTH: u32 = 3;

/// Prefix of the USB serial-number string descriptor
pub const SERIAL_PREFIX: &str = "ConsoleCast";

/// Timeout of each blocking read/write on the channel
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a driver read error before retrying
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Where the board exposes its unique serial number
const DEVICE_SERIAL_PATH: &str = "/proc/device-tree/serial-number";

/// Outcome of the request handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRequest {
    /// Video only
    Video,
    /// Audio only
    Audio,
    /// Video and audio over the same session
    Both,
    /// Short read, unknown code or shutdown: go back to waiting
    Failed,
}

impl StreamRequest {
    /// Decode a request code received from the host
    pub fn from_code(code: u32) -> Self {
        match code {
            REQUEST_VIDEO => StreamRequest::Video,
            REQUEST_AUDIO => StreamRequest::Audio,
            REQUEST_BOTH => StreamRequest::Both,
            _ => StreamRequest::Failed,
        }
    }

    /// Streams to serve, video first
    pub fn streams(self) -> &'static [StreamKind] {
        match self {
            StreamRequest::Video => &[StreamKind::Video],
            StreamRequest::Audio => &[StreamKind::Audio],
            StreamRequest::Both => &[StreamKind::Video, StreamKind::Audio],
            StreamRequest::Failed => &[],
        }
    }
}

/// USB device descriptor values presented to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
    pub manufacturer: String,
    pub serial: String,
}

impl DeviceIdentity {
    /// Build the identity from configuration, looking up the board serial
    /// when none is configured.
    pub fn from_config(config: &UsbConfig) -> Self {
        let serial = match config.serial_number.clone() {
            Some(serial) => Some(serial),
            None => lookup_device_serial(),
        };

        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            device_name: config.device_name.clone(),
            manufacturer: config.manufacturer.clone(),
            serial: device_serial_string(serial.as_deref()),
        }
    }
}

/// Serial-number descriptor string: `"<prefix>:<serial>"`, or a placeholder
/// when the serial is unknown.
pub fn device_serial_string(serial: Option<&str>) -> String {
    match serial.map(str::trim).filter(|s| !s.is_empty()) {
        Some(serial) => format!("{}:{}", SERIAL_PREFIX, serial),
        None => format!("{}:Unknown serial", SERIAL_PREFIX),
    }
}

/// Read the board's unique serial number, if the platform exposes one
pub fn lookup_device_serial() -> Option<String> {
    match fs::read(DEVICE_SERIAL_PATH) {
        Ok(raw) => {
            let serial: String = String::from_utf8_lossy(&raw)
                .trim_end_matches('\0')
                .trim()
                .to_string();
            (!serial.is_empty()).then_some(serial)
        }
        Err(e) => {
            log::debug!("No device serial at {}: {}", DEVICE_SERIAL_PATH, e);
            None
        }
    }
}

/// Low-level vendor interface
pub trait UsbSerialDriver: Send {
    /// Configure the interface with `identity` and enable it
    fn initialize(&mut self, identity: &DeviceIdentity) -> Result<()>;

    /// Read up to `buf.len()` bytes, blocking at most `timeout`.
    /// A timeout with nothing received returns `Ok(0)`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write `buf`, blocking at most `timeout`. Returns the bytes written.
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize>;

    /// Tear the interface down
    fn exit(&mut self);
}

/// Request handshake and packet output over a [`UsbSerialDriver`].
///
/// Reads and writes are serialized by one mutex; only one exchange is ever
/// in flight on the interface.
pub struct DeviceSerialChannel<D: UsbSerialDriver> {
    driver: Mutex<D>,
    running: RunFlag,
}

impl<D: UsbSerialDriver> DeviceSerialChannel<D> {
    /// Wrap `driver`; `running` bounds the request wait
    pub fn new(driver: D, running: RunFlag) -> Self {
        Self {
            driver: Mutex::new(driver),
            running,
        }
    }

    /// Present `identity` to the host and enable the interface
    pub fn initialize(&self, identity: &DeviceIdentity) -> Result<()> {
        log::info!(
            "USB interface {:04x}:{:04x} \"{}\" serial \"{}\"",
            identity.vendor_id,
            identity.product_id,
            identity.device_name,
            identity.serial
        );
        self.driver.lock().initialize(identity)
    }

    /// Block until the host sends a request code or the running flag clears.
    ///
    /// Each read is bounded by [`IO_TIMEOUT`]; the loop stops at the first
    /// read that returns any bytes.
    pub fn wait_for_client_request(&self) -> StreamRequest {
        let mut raw = [0u8; 4];
        let mut read;

        {
            let mut driver = self.driver.lock();
            loop {
                read = match driver.read(&mut raw, IO_TIMEOUT) {
                    Ok(n) => n,
                    Err(e) => {
                        log::warn!("USB read failed: {}", e);
                        thread::sleep(READ_ERROR_BACKOFF);
                        0
                    }
                };
                if read != 0 || !self.running.is_running() {
                    break;
                }
            }
        }

        if read != raw.len() || !self.running.is_running() {
            log::debug!("USB request wait ended with {} bytes", read);
            return StreamRequest::Failed;
        }

        let code = u32::from_le_bytes(raw);
        log::info!("USB request received: {:#x}", code);

        let request = StreamRequest::from_code(code);
        if request == StreamRequest::Failed {
            log::warn!("Ignoring unknown USB request {:#x}", code);
        }
        request
    }

    /// Write one buffer. A short write is a failure.
    pub fn send(&self, buf: &[u8]) -> Result<()> {
        let sent = self.driver.lock().write(buf, IO_TIMEOUT)?;
        if sent != buf.len() {
            return Err(Error::Other(format!(
                "USB short write: {} of {} bytes",
                sent,
                buf.len()
            )));
        }
        Ok(())
    }
}

impl<D: UsbSerialDriver> Drop for DeviceSerialChannel<D> {
    fn drop(&mut self) {
        self.driver.get_mut().exit();
    }
}

impl<D: UsbSerialDriver> PacketSink for DeviceSerialChannel<D> {
    fn send_packet(&mut self, bytes: &[u8]) -> Result<()> {
        self.send(bytes)
    }
}
