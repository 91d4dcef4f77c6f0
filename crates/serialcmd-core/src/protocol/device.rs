//! Blocking device abstraction
//!
//! Everything in here blocks. Devices are only ever driven from a
//! transport's worker thread, never from async code.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use super::{serial::SerialPortDevice, ProtocolError, TransportConfig, LOOPBACK_URL};

/// Which of the two link timeouts an operation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutProperty {
    /// Bound on a single `read_until`
    Read,
    /// Bound on a single write
    Write,
}

/// A blocking, byte-oriented serial handle.
///
/// A `None` timeout means "block until the operation completes".
pub trait SerialDevice: Send + 'static {
    /// Acquire the underlying handle
    fn open(&mut self) -> Result<(), ProtocolError>;

    /// Release the underlying handle
    fn close(&mut self) -> Result<(), ProtocolError>;

    /// Whether the handle is currently acquired
    fn is_open(&self) -> bool;

    /// Discard any unread input
    fn clear_input(&mut self) -> Result<(), ProtocolError>;

    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Block until written data has been physically transmitted
    fn flush(&mut self) -> Result<(), ProtocolError>;

    /// Read until `delimiter` has been seen or the read timeout elapses.
    ///
    /// Returns whatever was accumulated; an empty buffer means the read
    /// timed out with no data at all.
    fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    /// Current value of a timeout property
    fn timeout(&self, property: TimeoutProperty) -> Option<Duration>;

    /// Change a timeout property
    fn set_timeout(
        &mut self,
        property: TimeoutProperty,
        value: Option<Duration>,
    ) -> Result<(), ProtocolError>;
}

/// Build the device named by `config.port`.
///
/// `loop://` yields an in-memory [`LoopbackDevice`]; anything else is a
/// serial port path. The device is returned closed.
pub fn open_device(config: &TransportConfig) -> Box<dyn SerialDevice> {
    if config.port.starts_with(LOOPBACK_URL) {
        Box::new(LoopbackDevice::new(config.timeout, config.write_timeout))
    } else {
        Box::new(SerialPortDevice::new(config))
    }
}

/// In-memory device that echoes everything written back as input
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    open: bool,
    buffer: VecDeque<u8>,
    timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl LoopbackDevice {
    /// Create a closed loopback device
    pub fn new(timeout: Option<Duration>, write_timeout: Option<Duration>) -> Self {
        Self {
            open: false,
            buffer: VecDeque::new(),
            timeout,
            write_timeout,
        }
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.open {
            Ok(())
        } else {
            Err(ProtocolError::NotOpen)
        }
    }
}

impl SerialDevice for LoopbackDevice {
    fn open(&mut self) -> Result<(), ProtocolError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.open = false;
        self.buffer.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.buffer.clear();
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.buffer.extend(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        self.ensure_open()
    }

    // Nothing else can write while the worker is inside this call, so an
    // exhausted buffer is final and there is no point waiting out the timeout.
    fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.ensure_open()?;
        let mut response = Vec::new();
        while let Some(byte) = self.buffer.pop_front() {
            response.push(byte);
            if !delimiter.is_empty() && response.ends_with(delimiter) {
                break;
            }
        }
        Ok(response)
    }

    fn timeout(&self, property: TimeoutProperty) -> Option<Duration> {
        match property {
            TimeoutProperty::Read => self.timeout,
            TimeoutProperty::Write => self.write_timeout,
        }
    }

    fn set_timeout(
        &mut self,
        property: TimeoutProperty,
        value: Option<Duration>,
    ) -> Result<(), ProtocolError> {
        match property {
            TimeoutProperty::Read => self.timeout = value,
            TimeoutProperty::Write => self.write_timeout = value,
        }
        Ok(())
    }
}
