//! Transports delivering framed packets to the receiving host

pub mod mock;
pub mod serial;
pub mod socket;
pub mod usb;

pub use serial::SerialPortDriver;
pub use socket::{SendPolicy, TcpSink};
pub use usb::{DeviceIdentity, DeviceSerialChannel, StreamRequest, UsbSerialDriver};
