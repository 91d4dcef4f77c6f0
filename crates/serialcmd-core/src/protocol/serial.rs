//! Serial port handling
//!
//! Hardware-backed [`SerialDevice`] plus port discovery.

use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use super::{ProtocolError, SerialDevice, TimeoutProperty, TransportConfig};

/// Per-call timeout used when a property is `None` (block indefinitely)
const BLOCKING_SLICE: Duration = Duration::from_secs(3600);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,
    /// Product name (if available)
    pub product: Option<String>,
    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::named(info.port_name),
        }
    }
}

/// ttyACM first, then ttyUSB (both numerically), then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0, "ttyACM"), (1, "ttyUSB")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List the serial ports the OS reports, in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            tracing::warn!("serial port enumeration failed: {e}");
            Vec::new()
        }
    };
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// A real serial port driven through the `serialport` crate.
///
/// Closing drops the OS handle; opening builds a fresh one from the
/// stored settings.
pub struct SerialPortDevice {
    path: String,
    baud_rate: u32,
    timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortDevice {
    /// Create a closed device for `config.port`
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            path: config.port.clone(),
            baud_rate: config.baud_rate,
            timeout: config.timeout,
            write_timeout: config.write_timeout,
            port: None,
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port.as_mut().ok_or(ProtocolError::NotOpen)
    }
}

/// Byte source whose per-read timeout can be changed between reads
trait TimedRead: Read {
    fn set_budget(&mut self, budget: Duration) -> Result<(), ProtocolError>;
}

impl TimedRead for Box<dyn SerialPort> {
    fn set_budget(&mut self, budget: Duration) -> Result<(), ProtocolError> {
        Ok((**self).set_timeout(budget)?)
    }
}

/// Read until `delimiter` or `deadline`, one byte at a time.
///
/// Past the deadline reads continue with a zero budget, so bytes already
/// buffered are still returned and a zero timeout behaves as a poll.
fn read_until_deadline<R: TimedRead + ?Sized>(
    port: &mut R,
    delimiter: &[u8],
    deadline: Option<Instant>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        // Re-apply what is left of the total budget before every read
        let budget = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => BLOCKING_SLICE,
        };
        port.set_budget(budget)?;

        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                response.push(byte[0]);
                if response.ends_with(delimiter) {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                if deadline.is_some() {
                    break;
                }
            }
            Err(e) => return Err(ProtocolError::Serial(e.to_string())),
        }
    }
    Ok(response)
}

impl SerialDevice for SerialPortDevice {
    fn open(&mut self) -> Result<(), ProtocolError> {
        // Standard 8N1, no flow control
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.timeout.unwrap_or(BLOCKING_SLICE))
            .open()
            .map_err(|e| ProtocolError::Open {
                port: self.path.clone(),
                reason: e.to_string(),
            })?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.port = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        Ok(self.port_mut()?.clear(ClearBuffer::Input)?)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let budget = self.write_timeout.unwrap_or(BLOCKING_SLICE);
        let port = self.port_mut()?;
        port.set_timeout(budget)?;
        port.write_all(data)
            .map_err(|e| ProtocolError::Serial(e.to_string()))
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        self.port_mut()?
            .flush()
            .map_err(|e| ProtocolError::Serial(e.to_string()))
    }

    fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        read_until_deadline(self.port_mut()?, delimiter, deadline)
    }

    fn timeout(&self, property: TimeoutProperty) -> Option<Duration> {
        match property {
            TimeoutProperty::Read => self.timeout,
            TimeoutProperty::Write => self.write_timeout,
        }
    }

    // Both timeouts are applied per call, so only the stored value changes here
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
