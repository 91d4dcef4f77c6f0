//! Connection management
//!
//! A [`Connection`] owns one [`Transport`] and turns it into a
//! request/response channel: one exchange at a time, responses classified
//! by keyword, timeouts retried with a link reset in between.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    response::{self, Classification},
    CommandBuilder, ProtocolError, ResponseVocabulary, TimeoutProperty, Transport,
    TransportConfig, DEFAULT_ACK, DEFAULT_BAUD_RATE, DEFAULT_RETRY_WAIT_MS, DEFAULT_TIMEOUT_MS,
};

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Device path or URL
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Default read timeout in milliseconds; `None` blocks indefinitely
    pub timeout_ms: Option<u64>,
    /// Write timeout in milliseconds; `None` blocks indefinitely
    pub write_timeout_ms: Option<u64>,
    /// Acknowledgement pattern terminating a successful response
    pub ack: String,
    /// Name used in logs; defaults to the port
    pub name: Option<String>,
    /// Retries used by [`Connection::send_default`]
    pub retries: u32,
    /// Pause before a link reset between attempts
    pub retry_wait_ms: u64,
    /// Discard unread input before every write
    pub reset_input_before_write: bool,
    /// Error/alarm keywords
    pub vocabulary: ResponseVocabulary,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            write_timeout_ms: None,
            ack: DEFAULT_ACK.to_string(),
            name: None,
            retries: 0,
            retry_wait_ms: DEFAULT_RETRY_WAIT_MS,
            reset_input_before_write: false,
            vocabulary: ResponseVocabulary::standard(),
        }
    }
}

impl ConnectionConfig {
    /// Configuration for `port` acknowledging with `ack`, defaults elsewhere
    pub fn new(port: impl Into<String>, ack: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ack: ack.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Settings for the physical link
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            timeout: self.timeout_ms.map(Duration::from_millis),
            write_timeout: self.write_timeout_ms.map(Duration::from_millis),
            reset_input_before_write: self.reset_input_before_write,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.ack.is_empty() {
            return Err(ProtocolError::InvalidConfig(
                "acknowledgement pattern must not be empty".to_string(),
            ));
        }
        self.vocabulary.validate()
    }
}

/// Command/response channel over one serial link.
///
/// At most one exchange is in flight per connection: [`Connection::send`]
/// holds the send lock for the whole exchange, retries and timeout override
/// included. Separate connections never block each other.
///
/// Dropping a `send` future while an attempt is outstanding does not stop
/// that attempt on the wire; the worker completes it and the result is
/// discarded.
pub struct Connection {
    transport: Transport,
    port: String,
    name: String,
    ack: Vec<u8>,
    vocabulary: ResponseVocabulary,
    retries: u32,
    retry_wait: Duration,
    send_lock: Mutex<()>,
}

impl Connection {
    /// Open the link described by `config`
    pub async fn create(config: ConnectionConfig) -> Result<Self, ProtocolError> {
        config.validate()?;
        let transport = Transport::create(config.transport_config()).await?;
        Self::with_transport(transport, config)
    }

    /// Wrap an already-open transport. Link settings in `config` are ignored.
    pub fn with_transport(
        transport: Transport,
        config: ConnectionConfig,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let vocabulary = config.vocabulary.normalized();
        let port = transport.port().to_string();
        Ok(Self {
            name: config.name.unwrap_or_else(|| port.clone()),
            port,
            ack: config.ack.into_bytes(),
            vocabulary,
            retries: config.retries,
            retry_wait: Duration::from_millis(config.retry_wait_ms),
            send_lock: Mutex::new(()),
            transport,
        })
    }

    /// Port identifier
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keywords responses are classified with
    pub fn vocabulary(&self) -> &ResponseVocabulary {
        &self.vocabulary
    }

    /// Retries made by [`Connection::send_default`]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Read timeout currently in effect on the link
    pub fn read_timeout(&self) -> Option<Duration> {
        self.transport.timeout(TimeoutProperty::Read)
    }

    /// Whether `response` is an asynchronous error notice for this device.
    ///
    /// Delivering such notices to anyone is up to the caller.
    pub fn is_async_notice(&self, response: &str) -> bool {
        self.vocabulary.is_async_notice(response)
    }

    /// Send `command` and wait for its classified response.
    ///
    /// Up to `retries + 1` attempts are made. Only a read that ends without
    /// the acknowledgement and without the error keyword is retried, after
    /// waiting the retry interval and resetting the link. `timeout`
    /// overrides the read timeout for this call only.
    pub async fn send<C>(
        &self,
        command: &C,
        retries: u32,
        timeout: Option<Duration>,
    ) -> Result<String, ProtocolError>
    where
        C: CommandBuilder + Sync + ?Sized,
    {
        let payload = command.build();
        let description = command.describe();

        let _exclusive = self.send_lock.lock().await;
        let scope = self
            .transport
            .override_timeout(TimeoutProperty::Read, timeout)
            .await?;
        let result = self.exchange(&payload, &description, retries).await;
        let restored = scope.restore().await;

        let response = result?;
        restored?;
        Ok(response)
    }

    /// [`Connection::send`] with the configured retries and the link's own
    /// read timeout
    pub async fn send_default<C>(&self, command: &C) -> Result<String, ProtocolError>
    where
        C: CommandBuilder + Sync + ?Sized,
    {
        self.send(command, self.retries, None).await
    }

    /// Write `command` under the send lock without waiting for any answer
    pub async fn send_without_response<C>(&self, command: &C) -> Result<(), ProtocolError>
    where
        C: CommandBuilder + Sync + ?Sized,
    {
        let payload = command.build();
        let _exclusive = self.send_lock.lock().await;
        tracing::debug!("{}: Write -> {:?}", self.name, command.describe());
        self.transport.write(&payload).await
    }

    /// Reopen the link, waiting for any exchange in progress
    pub async fn open(&self) -> Result<(), ProtocolError> {
        let _exclusive = self.send_lock.lock().await;
        self.transport.open().await
    }

    /// Close the link, waiting for any exchange in progress
    pub async fn close(&self) -> Result<(), ProtocolError> {
        let _exclusive = self.send_lock.lock().await;
        self.transport.close().await
    }

    /// Whether the link is currently open
    pub async fn is_open(&self) -> Result<bool, ProtocolError> {
        self.transport.is_open().await
    }

    async fn exchange(
        &self,
        payload: &[u8],
        description: &str,
        retries: u32,
    ) -> Result<String, ProtocolError> {
        for attempt in 0..=retries {
            tracing::debug!("{}: Write -> {:?}", self.name, description);
            self.transport.write(payload).await?;

            let raw = self.transport.read_until(&self.ack).await?;
            tracing::debug!("{}: Read <- {:?}", self.name, String::from_utf8_lossy(&raw));

            if response::is_complete(&raw, &self.ack, &self.vocabulary.error_keyword) {
                return self.outcome(response::process(&raw, &self.ack, &self.vocabulary));
            }

            if attempt < retries {
                tracing::info!("{}: retry number {}/{}", self.name, attempt + 1, retries);
                self.reset_link().await?;
            }
        }

        tracing::warn!(
            "{}: no response to {:?} after {} attempt(s)",
            self.name,
            description,
            retries as u64 + 1
        );
        Err(ProtocolError::NoResponse {
            port: self.port.clone(),
            command: description.to_string(),
        })
    }

    async fn reset_link(&self) -> Result<(), ProtocolError> {
        tokio::time::sleep(self.retry_wait).await;
        self.transport.close().await?;
        self.transport.open().await
    }

    fn outcome(&self, classification: Classification) -> Result<String, ProtocolError> {
        match classification {
            Classification::Acknowledged(response) => Ok(response),
            Classification::Alarm(response) => Err(ProtocolError::AlarmResponse {
                port: self.port.clone(),
                response,
            }),
            Classification::Error(response) => Err(ProtocolError::ErrorResponse {
                port: self.port.clone(),
                response,
            }),
        }
    }
}
