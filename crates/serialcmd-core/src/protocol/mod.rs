//! Serial Command Protocol
//!
//! Layers, bottom up:
//! - [`SerialDevice`]: a blocking handle (hardware port or `loop://`)
//! - [`Transport`]: async front end running every device call on one worker
//! - [`response`]: keyword classification of raw answers
//! - [`Connection`]: locked, retrying command/response exchanges

pub mod command_builder;
mod connection;
pub mod device;
mod error;
pub mod response;
pub mod serial;
mod transport;
mod worker;

pub use command_builder::CommandBuilder;
pub use connection::{Connection, ConnectionConfig};
pub use device::{open_device, LoopbackDevice, SerialDevice, TimeoutProperty};
pub use error::ProtocolError;
pub use response::{Classification, ResponseVocabulary};
pub use serial::{list_ports, PortInfo, SerialPortDevice};
pub use transport::{TimeoutOverride, Transport, TransportConfig};

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default pause before a link reset between attempts, in milliseconds
pub const DEFAULT_RETRY_WAIT_MS: u64 = 100;

/// Default acknowledgement pattern
pub const DEFAULT_ACK: &str = "OK";

/// Device URL selecting the in-memory loopback device
pub const LOOPBACK_URL: &str = "loop://";
