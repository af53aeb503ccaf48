//! The dispatch worker: one thread, one command at a time.
//!
//! The worker owns the only mutating path to the queue store and the only
//! network calls. It runs a current-thread tokio runtime on its own OS
//! thread and alternates between waiting for the next unit of work and
//! processing it to completion.
//!
//! A panic or a strictly-escalated error while processing ends the worker:
//! the lifecycle becomes `Dead`, the mailbox closes and anything still queued
//! is dropped.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::codec;
use crate::collector::{
    fetch_configure, parse_event_bindings, CollectorRequest, ResultSink, Transport,
};
use crate::config::{DispatchConfig, ErrorPolicy};
use crate::error::{Error, Result};
use crate::store::QueueStore;
use crate::types::{Batch, Event, Table};

use super::command::{Command, FlushTag};
use super::mailbox::Shared;

/// What the worker picked up next.
enum Next {
    Command(Command),
    TimerFired(FlushTag),
    Closed,
}

/// How one batch left the queue.
enum Delivery {
    /// Accepted by the collector
    Sent(usize),
    /// Dropped without delivery; resending cannot succeed
    Discarded { purged: usize, reason: Error },
}

/// Whether the loop keeps going after a unit of work.
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Worker<T: Transport> {
    shared: Arc<Shared>,
    rx: UnboundedReceiver<Command>,
    store: Arc<dyn QueueStore>,
    transport: T,
    config: DispatchConfig,
    timers: HashMap<FlushTag, Instant>,
}

impl<T: Transport> Worker<T> {
    pub(crate) fn new(
        shared: Arc<Shared>,
        rx: UnboundedReceiver<Command>,
        store: Arc<dyn QueueStore>,
        transport: T,
        config: DispatchConfig,
    ) -> Self {
        Self {
            shared,
            rx,
            store,
            transport,
            config,
            timers: HashMap::new(),
        }
    }

    /// Thread body. Returns when killed, faulted, or every handle is gone.
    pub(crate) fn run(mut self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.fault(&format!("failed to create worker runtime: {}", e));
                return;
            }
        };

        debug!("Dispatch worker started");
        loop {
            let work = match runtime.block_on(self.next()) {
                Next::Closed => {
                    debug!(
                        armed_timers = self.timers.len(),
                        "Mailbox closed; dispatch worker exiting"
                    );
                    break;
                }
                work => work,
            };

            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(self.process(work))));
            match outcome {
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Stop)) => break,
                Ok(Err(err)) => {
                    self.fault(&err.to_string());
                    break;
                }
                Err(payload) => {
                    self.fault(&panic_message(payload.as_ref()));
                    break;
                }
            }
        }
        self.discard_pending();
    }

    async fn next(&mut self) -> Next {
        loop {
            if let Some(tag) = self.take_due_timer(Instant::now()) {
                self.shared.fire(tag);
                return Next::TimerFired(tag);
            }

            let Some(deadline) = self.timers.values().min().copied() else {
                return self.rx.recv().await.map_or(Next::Closed, Next::Command);
            };
            tokio::select! {
                command = self.rx.recv() => {
                    return command.map_or(Next::Closed, Next::Command);
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    fn take_due_timer(&mut self, now: Instant) -> Option<FlushTag> {
        let tag = self
            .timers
            .iter()
            .filter(|(_, fire_at)| **fire_at <= now)
            .min_by_key(|(_, fire_at)| **fire_at)
            .map(|(tag, _)| *tag)?;
        self.timers.remove(&tag);
        Some(tag)
    }

    async fn process(&mut self, work: Next) -> Result<Flow> {
        let command = match work {
            Next::Command(command) => command,
            Next::TimerFired(tag) => {
                debug!(%tag, "Delayed flush fired");
                let result = self.flush().await;
                self.settle(result)?;
                return Ok(Flow::Continue);
            }
            Next::Closed => return Ok(Flow::Stop),
        };

        trace!(command = command.kind(), "Processing command");
        match command {
            Command::EnqueueEvent(event) => {
                let result = self.enqueue(&event);
                self.settle(result)?;
            }
            Command::FlushNow => {
                let result = self.flush().await;
                self.settle(result)?;
            }
            Command::FlushDelayed { tag, fire_at } => {
                self.timers.insert(tag, fire_at);
            }
            Command::CheckConfigure(sink) => self.check_configure(sink.as_ref()).await,
            Command::KillWorker => {
                self.kill();
                return Ok(Flow::Stop);
            }
            Command::Drain(ack) => {
                // the waiter may have timed out already
                let _ = ack.send(());
            }
        }
        Ok(Flow::Continue)
    }

    /// Apply the error policy to the outcome of one command.
    fn settle(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => match self.config.error_policy {
                ErrorPolicy::Lenient => {
                    warn!(error = %err, "Command failed; worker continues");
                    Ok(())
                }
                ErrorPolicy::Strict => {
                    error!(error = %err, "Command failed under strict error policy");
                    Err(Error::Fatal(err.to_string()))
                }
            },
        }
    }

    fn enqueue(&self, event: &Event) -> Result<()> {
        let id = self.store.insert(event.table(), event)?;
        trace!(id, table = %event.table(), "Event queued");
        Ok(())
    }

    /// Send batches until the table is empty or a pass fails.
    ///
    /// A discarded batch does not stop the pass under the lenient policy;
    /// the rows behind it are still sent.
    async fn flush(&self) -> Result<()> {
        let limit = self.config.effective_batch_size();
        loop {
            let Some(batch) = self.store.read_oldest(Table::Events, limit)? else {
                return Ok(());
            };
            let purged = match self.send_batch(&batch).await? {
                Delivery::Sent(purged) => purged,
                Delivery::Discarded { purged, reason } => {
                    if self.config.error_policy == ErrorPolicy::Strict {
                        return Err(reason);
                    }
                    warn!(error = %reason, purged, "Batch discarded; continuing flush");
                    purged
                }
            };
            let remaining = self.store.count(Table::Events)?;
            debug!(
                rows = batch.len,
                max_id = batch.max_id,
                purged,
                remaining,
                "Batch done"
            );
            if purged == 0 || remaining == 0 {
                return Ok(());
            }
        }
    }

    /// POST one batch, purging it on success.
    async fn send_batch(&self, batch: &Batch) -> Result<Delivery> {
        let url = self.config.server_url.as_deref().ok_or_else(|| {
            Error::Config("dispatch.server_url is required to flush".to_string())
        })?;

        let data_list = match codec::encode(&batch.payload) {
            Ok(data_list) => data_list,
            Err(reason) => {
                // resending cannot fix it
                let purged = self.store.purge(Table::Events, batch.max_id)?;
                return Ok(Delivery::Discarded { purged, reason });
            }
        };

        let debug_mode = self.config.debug_mode;
        let request = CollectorRequest {
            data_list,
            dry_run: debug_mode.is_dry_run(),
        };
        debug!(
            rows = batch.len,
            bytes = request.data_list.len(),
            dry_run = request.dry_run,
            "Sending batch to collector"
        );
        let reply = self.transport.post_batch(url, &request).await?;

        if reply.is_ok() {
            if debug_mode.is_debug() {
                debug!(status = reply.status, body = %reply.body, payload = %batch.payload, "Valid message");
            }
            return Ok(Delivery::Sent(
                self.store.purge(Table::Events, batch.max_id)?,
            ));
        }

        let reason = Error::Connect(format!(
            "collector returned {}: {}",
            reply.status, reply.body
        ));
        if debug_mode.is_debug() {
            warn!(status = reply.status, body = %reply.body, payload = %batch.payload, "Invalid message; discarding batch");
            let purged = self.store.purge(Table::Events, batch.max_id)?;
            return Ok(Delivery::Discarded { purged, reason });
        }
        Err(reason)
    }

    async fn check_configure(&self, sink: &dyn ResultSink) {
        let Some(url) = self.config.configure_url.as_deref() else {
            warn!("dispatch.configure_url is not set; skipping configure check");
            return;
        };

        debug!(url, "Requesting configure document");
        let body = match fetch_configure(&self.transport, url).await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "Failed to fetch configure document");
                return;
            }
        };

        match parse_event_bindings(&body) {
            Ok(Some(events)) => {
                debug!(count = events.len(), "Reporting event bindings");
                sink.report_results(events);
            }
            Ok(None) => debug!("Configure document carries no event bindings"),
            Err(err) => warn!(error = %err, "Unexpected configure document"),
        }
    }

    fn kill(&self) {
        warn!("Worker received a hard kill; dumping all events");
        let wiped = self.shared.mark_dead_with(|| self.store.wipe_all());
        self.shared.close();
        if let Err(err) = wiped {
            error!(error = %err, "Failed to wipe queue store during hard kill");
        }
    }

    fn fault(&self, reason: &str) {
        error!(reason, "Worker fault; no more analytics commands will be processed");
        self.shared.mark_dead();
        self.shared.close();
    }

    fn discard_pending(&mut self) {
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            debug!(command = command.kind(), "Dead worker dropping a command");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panic: boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaput"));
        assert_eq!(panic_message(payload.as_ref()), "panic: kaput");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "panic with non-string payload");
    }
}
