//! Protocol errors

use thiserror::Error;

/// Errors that can occur while exchanging commands over a serial link
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The physical link could not be acquired
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// Every attempt timed out without an acknowledgement or keyword match
    #[error("No response from {port} to command {command:?}")]
    NoResponse { port: String, command: String },

    /// The device answered with its error keyword
    #[error("Error response from {port}: {response}")]
    ErrorResponse { port: String, response: String },

    /// The device answered with its alarm keyword
    #[error("Alarm response from {port}: {response}")]
    AlarmResponse { port: String, response: String },

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Serial port is not open")]
    NotOpen,

    #[error("Serial worker has stopped")]
    WorkerStopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when the device itself reported a failure (error or alarm keyword)
    pub fn is_response_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::ErrorResponse { .. } | ProtocolError::AlarmResponse { .. }
        )
    }

    /// Port the failure is attributed to, if any
    pub fn port(&self) -> Option<&str> {
        match self {
            ProtocolError::Open { port, .. }
            | ProtocolError::NoResponse { port, .. }
            | ProtocolError::ErrorResponse { port, .. }
            | ProtocolError::AlarmResponse { port, .. } => Some(port),
            _ => None,
        }
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::Serial(e.to_string())
    }
}
