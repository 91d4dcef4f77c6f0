//! Dedicated serial worker
//!
//! One OS thread per link runs every blocking device call in submission
//! order. Callers await results over oneshot channels, so the async side
//! never blocks on the physical link.

use std::sync::mpsc;
use std::thread;

use super::{ProtocolError, SerialDevice};

type Job = Box<dyn FnOnce(&mut dyn SerialDevice) + Send>;

/// Cloneable handle to a worker's FIFO job queue
#[derive(Clone)]
pub(crate) struct Worker {
    jobs: mpsc::Sender<Job>,
}

impl Worker {
    /// Move `device` onto a new worker thread named after `label`
    pub(crate) fn spawn(
        label: &str,
        mut device: Box<dyn SerialDevice>,
    ) -> Result<Self, ProtocolError> {
        let (jobs, queue) = mpsc::channel::<Job>();
        // Thread names cannot hold NUL
        let name = format!("serial-{}", label.replace('\0', ""));

        thread::Builder::new().name(name.clone()).spawn(move || {
            tracing::trace!("{name}: worker started");
            // Ends once every Worker handle has been dropped
            for job in queue {
                job(device.as_mut());
            }
            tracing::trace!("{name}: worker stopped");
        })?;

        Ok(Self { jobs })
    }

    /// Run `f` on the worker and wait for its result.
    ///
    /// Dropping the returned future does not abort the job: it still runs
    /// against the device, only its result is discarded.
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T, ProtocolError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialDevice) -> Result<T, ProtocolError> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.jobs
            .send(Box::new(move |device: &mut dyn SerialDevice| {
                let _ = tx.send(f(device));
            }))
            .map_err(|_| ProtocolError::WorkerStopped)?;

        rx.await.map_err(|_| ProtocolError::WorkerStopped)?
    }

    /// Queue `f` without waiting for it
    pub(crate) fn post<F>(&self, f: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&mut dyn SerialDevice) + Send + 'static,
    {
        self.jobs
            .send(Box::new(f))
            .map_err(|_| ProtocolError::WorkerStopped)
    }
}
