//! Event dispatch
//!
//! [`Dispatcher`] is the producer-facing handle. Every call turns into one
//! command on the worker's mailbox and returns immediately; the worker thread
//! executes commands strictly in receipt order.
//!
//! ## Architecture
//!
//! ```text
//! producer threads ──submit_*──► mailbox (FIFO) ──► worker thread
//!                                                    ├─ queue store
//!                                                    └─ transport (POST / GET)
//! ```
//!
//! Producers never see errors. Failures are logged by the worker and, under
//! the strict error policy or on a panic, end the worker for good; from then
//! on every submission is dropped.

mod command;
mod mailbox;
mod worker;

pub use command::{FlushTag, AUTO_FLUSH};

use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::collector::{ResultSink, Transport};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::network::{NetworkInfo, UnknownNetwork};
use crate::store::QueueStore;
use crate::types::{Event, Lifecycle};

use command::Command;
use mailbox::Shared;
use worker::Worker;

/// Handle to a running dispatch worker.
///
/// Dropping the handle closes the mailbox; the worker finishes what is
/// already queued and exits.
pub struct Dispatcher {
    name: String,
    shared: Arc<Shared>,
    store: Arc<dyn QueueStore>,
    network: Box<dyn NetworkInfo>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Start a worker thread named `tally-dispatch-<name>`.
    pub fn spawn<T: Transport>(
        name: &str,
        config: DispatchConfig,
        store: Arc<dyn QueueStore>,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;

        let (shared, rx) = Shared::new();
        let shared = Arc::new(shared);
        let worker = Worker::new(
            Arc::clone(&shared),
            rx,
            Arc::clone(&store),
            transport,
            config.clone(),
        );

        std::thread::Builder::new()
            .name(format!("tally-dispatch-{}", name))
            .spawn(move || worker.run())?;

        tracing::debug!(name, "Spawned dispatch worker");

        Ok(Self {
            name: name.to_string(),
            shared,
            store,
            network: Box::new(UnknownNetwork),
            config,
        })
    }

    /// Replace the connectivity source
    pub fn with_network(mut self, network: impl NetworkInfo + 'static) -> Self {
        self.network = Box::new(network);
        self
    }

    /// Queue an event for delivery.
    pub fn submit_event(&self, event: impl Into<Event>) {
        self.shared.deliver(Command::EnqueueEvent(event.into()));
    }

    /// Request a flush.
    ///
    /// A zero delay flushes as soon as the worker reaches the request. A
    /// non-zero delay is coalesced: while one delayed flush is pending,
    /// further delayed requests are ignored.
    pub fn submit_flush(&self, delay: Duration) {
        self.submit_flush_tagged(AUTO_FLUSH, delay);
    }

    /// Like [`submit_flush`](Self::submit_flush), coalescing per `tag`.
    pub fn submit_flush_tagged(&self, tag: FlushTag, delay: Duration) {
        if delay.is_zero() {
            self.shared.deliver(Command::FlushNow);
        } else {
            self.shared.deliver_delayed(tag, delay);
        }
    }

    /// Delayed flush using the configured flush interval
    pub fn schedule_flush(&self) {
        self.submit_flush(self.config.flush_interval());
    }

    /// Fetch the configure document and report its event bindings to `sink`.
    pub fn submit_check_configure(&self, sink: Arc<dyn ResultSink>) {
        self.shared.deliver(Command::CheckConfigure(sink));
    }

    /// Wipe the queue and stop the worker once it reaches this request.
    pub fn hard_kill(&self) {
        self.shared.deliver(Command::KillWorker);
    }

    pub fn is_dead(&self) -> bool {
        self.lifecycle() == Lifecycle::Dead
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Block until every command submitted before this call has been
    /// processed. Returns false on timeout or if the worker is dead.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        if !self.shared.deliver(Command::Drain(ack_tx)) {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Shared queue store, for inspection
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_wifi_connected(&self) -> bool {
        self.network.is_wifi_connected()
    }

    pub fn is_cellular_data_connected(&self) -> bool {
        self.network.is_cellular_data_connected()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
