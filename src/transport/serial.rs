//! Serial-port backed USB driver
//!
//! On Linux the vendor interface is exposed by the USB gadget stack as a tty
//! (e.g. `/dev/ttyGS0`). The descriptors are set up by the gadget
//! configuration; this driver only moves bytes.

use super::usb::{DeviceIdentity, UsbSerialDriver};
use crate::config::UsbConfig;
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// [`UsbSerialDriver`] over a gadget tty
pub struct SerialPortDriver {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortDriver {
    /// Driver for the tty at `path`; the port is opened by `initialize`
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
            port: None,
        }
    }

    /// Driver for the configured port
    pub fn from_config(config: &UsbConfig) -> Self {
        Self::new(&config.port, config.baud_rate)
    }

    fn port(&mut self, timeout: Duration) -> Result<&mut Box<dyn SerialPort>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Other(format!("serial port {} not open", self.path)))?;
        port.set_timeout(timeout)?;
        Ok(port)
    }
}

impl UsbSerialDriver for SerialPortDriver {
    fn initialize(&mut self, identity: &DeviceIdentity) -> Result<()> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(super::usb::IO_TIMEOUT)
            .open()?;

        log::info!(
            "Opened {} at {} baud for {}",
            self.path,
            self.baud_rate,
            identity.device_name
        );
        self.port = Some(port);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.port(timeout)?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let port = self.port(timeout)?;
        let mut written = 0;
        while written < buf.len() {
            match port.write(&buf[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        port.flush()?;
        Ok(written)
    }

    fn exit(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed {}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_before_initialize_fails() {
        let mut driver = SerialPortDriver::new("/dev/null-tty", 115200);
        let mut buf = [0u8; 4];
        assert!(driver.read(&mut buf, Duration::from_millis(1)).is_err());
        assert!(driver.write(&buf, Duration::from_millis(1)).is_err());
        driver.exit();
    }

    #[test]
    fn test_open_missing_port_fails() {
        let mut driver = SerialPortDriver::new("/dev/consolecast-missing", 115200);
        let identity = DeviceIdentity::from_config(&UsbConfig {
            serial_number: Some("T".to_string()),
            ..UsbConfig::default()
        });
        assert!(driver.initialize(&identity).is_err());
    }
}
