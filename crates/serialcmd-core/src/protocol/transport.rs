//! Async transport over one blocking serial handle
//!
//! All device calls go through a single worker thread, so operations reach the
//! link in exactly the order they were submitted even when several tasks
//! hold a reference to the same `Transport`.
//!
//! Cancelling a pending call does not interrupt the device: the worker
//! finishes the operation on the physical link and the result is dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    device::open_device, worker::Worker, ProtocolError, SerialDevice, TimeoutProperty,
    DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
};

/// Physical link settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Device path or URL (`/dev/ttyUSB0`, `COM3`, `loop://`)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout; `None` blocks until the delimiter arrives
    pub timeout: Option<Duration>,
    /// Write timeout; `None` blocks until the write completes
    pub write_timeout: Option<Duration>,
    /// Discard unread input before every write
    pub reset_input_before_write: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            write_timeout: None,
            reset_input_before_write: false,
        }
    }
}

/// Caller-side copy of the device timeouts, so reads need no worker trip.
///
/// Holds the values the device will have once every queued job has run:
/// changes are recorded when they are submitted, not when they complete.
#[derive(Debug, Clone, Copy)]
struct Timeouts {
    read: Option<Duration>,
    write: Option<Duration>,
}

impl Timeouts {
    fn get(&self, property: TimeoutProperty) -> Option<Duration> {
        match property {
            TimeoutProperty::Read => self.read,
            TimeoutProperty::Write => self.write,
        }
    }

    fn set(&mut self, property: TimeoutProperty, value: Option<Duration>) {
        match property {
            TimeoutProperty::Read => self.read = value,
            TimeoutProperty::Write => self.write = value,
        }
    }
}

type SharedTimeouts = Arc<Mutex<Timeouts>>;

fn lock(timeouts: &SharedTimeouts) -> MutexGuard<'_, Timeouts> {
    timeouts.lock().unwrap_or_else(|e| e.into_inner())
}

/// Job that sets a timeout on the device, resyncing the mirror if it refuses
fn timeout_job(
    mirror: SharedTimeouts,
    property: TimeoutProperty,
    value: Option<Duration>,
) -> impl FnOnce(&mut dyn SerialDevice) -> Result<(), ProtocolError> + Send + 'static {
    move |device: &mut dyn SerialDevice| {
        let result = device.set_timeout(property, value);
        if result.is_err() {
            lock(&mirror).set(property, device.timeout(property));
        }
        result
    }
}

/// Queue a timeout change on the worker and wait for the device to accept it
async fn apply_timeout(
    worker: &Worker,
    timeouts: &SharedTimeouts,
    property: TimeoutProperty,
    value: Option<Duration>,
) -> Result<(), ProtocolError> {
    lock(timeouts).set(property, value);
    worker
        .run(timeout_job(Arc::clone(timeouts), property, value))
        .await
}

/// Non-blocking front end for a blocking serial handle.
///
/// There is no implicit close: owners call [`Transport::close`] themselves.
/// Dropping the transport stops its worker, which drops the device.
pub struct Transport {
    port: String,
    worker: Worker,
    timeouts: SharedTimeouts,
    reset_input_before_write: bool,
}

impl Transport {
    /// Build the device named by `config.port` and open it on a new worker
    pub async fn create(config: TransportConfig) -> Result<Self, ProtocolError> {
        let device = open_device(&config);
        Self::spawn(&config.port, device, config.reset_input_before_write).await
    }

    /// Hand `device` to a new worker and open it there
    pub async fn spawn(
        port: &str,
        device: Box<dyn SerialDevice>,
        reset_input_before_write: bool,
    ) -> Result<Self, ProtocolError> {
        let timeouts = Timeouts {
            read: device.timeout(TimeoutProperty::Read),
            write: device.timeout(TimeoutProperty::Write),
        };
        let worker = Worker::spawn(port, device)?;
        let transport = Self {
            port: port.to_string(),
            worker,
            timeouts: Arc::new(Mutex::new(timeouts)),
            reset_input_before_write,
        };
        transport.open().await?;
        Ok(transport)
    }

    /// Port identifier this transport was created for
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Acquire the device. Failures are reported, never retried here.
    pub async fn open(&self) -> Result<(), ProtocolError> {
        let port = self.port.clone();
        self.worker
            .run(move |device| {
                device.open().map_err(|e| match e {
                    ProtocolError::Open { .. } => e,
                    other => ProtocolError::Open {
                        port,
                        reason: other.to_string(),
                    },
                })
            })
            .await?;
        tracing::debug!("{}: opened", self.port);
        Ok(())
    }

    /// Release the device. Callers track whether it is already closed.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        self.worker.run(|device| device.close()).await?;
        tracing::debug!("{}: closed", self.port);
        Ok(())
    }

    /// Whether the device is open, as seen after all queued operations
    pub async fn is_open(&self) -> Result<bool, ProtocolError> {
        self.worker.run(|device| Ok(device.is_open())).await
    }

    /// Write `data` and flush it onto the wire.
    ///
    /// Input is discarded first when the transport was configured to reset
    /// before writes.
    pub async fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let data = data.to_vec();
        let reset = self.reset_input_before_write;
        self.worker
            .run(move |device| {
                if reset {
                    device.clear_input()?;
                }
                device.write_all(&data)?;
                device.flush()
            })
            .await
    }

    /// Read until `delimiter` or the read timeout; empty means nothing arrived
    pub async fn read_until(&self, delimiter: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let delimiter = delimiter.to_vec();
        self.worker
            .run(move |device| device.read_until(&delimiter))
            .await
    }

    /// Current value of a timeout property
    pub fn timeout(&self, property: TimeoutProperty) -> Option<Duration> {
        lock(&self.timeouts).get(property)
    }

    /// Permanently change a timeout property
    pub async fn set_timeout(
        &self,
        property: TimeoutProperty,
        value: Option<Duration>,
    ) -> Result<(), ProtocolError> {
        apply_timeout(&self.worker, &self.timeouts, property, value).await?;
        tracing::debug!("{}: {:?} timeout set to {:?}", self.port, property, value);
        Ok(())
    }

    /// Temporarily override a timeout until the returned guard is released.
    ///
    /// `None`, or a value equal to the live one, yields an inactive guard
    /// without touching the worker. An active guard puts the original value
    /// back either through [`TimeoutOverride::restore`] or, if it is dropped
    /// first, by queueing the restore on the worker ahead of anything
    /// submitted afterwards.
    pub async fn override_timeout(
        &self,
        property: TimeoutProperty,
        value: Option<Duration>,
    ) -> Result<TimeoutOverride, ProtocolError> {
        let original = self.timeout(property);
        let mut scope = TimeoutOverride {
            worker: self.worker.clone(),
            timeouts: Arc::clone(&self.timeouts),
            property,
            original,
            active: matches!(value, Some(v) if Some(v) != original),
        };

        // The guard exists before the change is queued, so a caller dropped
        // mid-await still gets the original value put back.
        if scope.active {
            if let Err(e) = apply_timeout(&self.worker, &self.timeouts, property, value).await {
                scope.active = false;
                return Err(e);
            }
            tracing::debug!(
                "{}: {:?} timeout overridden {:?} -> {:?}",
                self.port,
                property,
                original,
                value
            );
        }

        Ok(scope)
    }
}

/// Scope of a temporary timeout change; see [`Transport::override_timeout`]
#[must_use = "the override is reverted as soon as the guard is dropped"]
pub struct TimeoutOverride {
    worker: Worker,
    timeouts: SharedTimeouts,
    property: TimeoutProperty,
    original: Option<Duration>,
    active: bool,
}

impl TimeoutOverride {
    /// Whether this guard actually changed the device
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Put the original value back and wait for the device to accept it
    pub async fn restore(mut self) -> Result<(), ProtocolError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        apply_timeout(&self.worker, &self.timeouts, self.property, self.original).await
    }
}

impl Drop for TimeoutOverride {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let (property, original) = (self.property, self.original);
        // Record the restore now so the next override snapshots the value
        // the device will really hold, not the abandoned one.
        lock(&self.timeouts).set(property, original);
        let job = timeout_job(Arc::clone(&self.timeouts), property, original);
        let posted = self.worker.post(move |device| {
            if let Err(e) = job(device) {
                tracing::error!("failed to restore {:?} timeout: {}", property, e);
            }
        });
        if posted.is_err() {
            tracing::warn!("worker gone before {:?} timeout could be restored", property);
        }
    }
}
