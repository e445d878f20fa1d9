//! Contracts between a connection and whoever performs the HTTP exchange.
//!
//! # Design
//! The core never opens a socket. A `Transport` receives a fully built
//! `HttpRequest` and reports back exactly once through its completion, from
//! whatever thread it likes. Each connection asks the `TransportFactory` for
//! its own transport, so cancelling one connection can never tear down
//! another's exchange.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{TransportError, TransportErrorKind};
use crate::http::{HttpRequest, HttpResponse};

/// Upload progress reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyProgress {
    pub bytes_sent: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_expected: u64,
}

pub type TransportCompletion = Box<dyn FnOnce(Result<HttpResponse, TransportError>) + Send>;
pub type ProgressHandler = Arc<dyn Fn(BodyProgress) + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Execute `request`. `completion` must be called exactly once.
    fn execute(&self, request: HttpRequest, progress: ProgressHandler, completion: TransportCompletion);

    /// Abort the in-flight exchange, if any. Called on every `cancel()`.
    fn invalidate_and_cancel(&self);
}

pub trait TransportFactory: Send + Sync {
    fn create_transport(&self) -> Arc<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Arc<dyn Transport> + Send + Sync,
{
    fn create_transport(&self) -> Arc<dyn Transport> {
        self()
    }
}

/// Fails every request. Used until a real transport is configured.
#[derive(Debug, Default)]
pub struct UnavailableTransport;

impl Transport for UnavailableTransport {
    fn execute(&self, request: HttpRequest, _progress: ProgressHandler, completion: TransportCompletion) {
        debug!(url = %request.url, "no transport configured");
        completion(Err(TransportError::new(
            TransportErrorKind::Other,
            "no transport configured",
        )));
    }

    fn invalidate_and_cancel(&self) {}
}

#[derive(Debug, Default)]
pub struct UnavailableTransportFactory;

impl TransportFactory for UnavailableTransportFactory {
    fn create_transport(&self) -> Arc<dyn Transport> {
        Arc::new(UnavailableTransport)
    }
}

pub type Job = Box<dyn FnOnce() + Send>;

/// Where delegate callbacks and response processing run.
pub trait DelegateQueue: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs jobs one at a time, in submission order, on a dedicated thread.
pub struct SerialQueue {
    sender: Mutex<Sender<Job>>,
}

impl SerialQueue {
    pub fn new(label: &str) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new().name(label.to_string()).spawn(move || {
            for job in receiver {
                job();
            }
        })?;
        Ok(Self {
            sender: Mutex::new(sender),
        })
    }
}

impl DelegateQueue for SerialQueue {
    fn dispatch(&self, job: Job) {
        if let Err(mpsc::SendError(job)) = self.sender.lock().send(job) {
            // worker gone, run inline
            job();
        }
    }
}
