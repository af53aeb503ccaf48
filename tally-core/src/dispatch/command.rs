//! Commands handed from producer threads to the dispatch worker.

use std::fmt;
use std::sync::{mpsc, Arc};

use tokio::time::Instant;

use crate::collector::ResultSink;
use crate::types::Event;

/// Coalescing key for delayed flushes.
///
/// At most one delayed flush per tag is pending at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlushTag(&'static str);

impl FlushTag {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FlushTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Tag used by `Dispatcher::submit_flush`
pub const AUTO_FLUSH: FlushTag = FlushTag::new("auto");

/// A unit of work for the worker. Consumed exactly once.
pub(crate) enum Command {
    /// Append an event to the queue store
    EnqueueEvent(Event),
    /// Fetch the configure document and report event bindings
    CheckConfigure(Arc<dyn ResultSink>),
    /// Flush immediately
    FlushNow,
    /// Arm a flush timer for `tag`, firing at `fire_at`
    FlushDelayed { tag: FlushTag, fire_at: Instant },
    /// Wipe the store and stop the worker
    KillWorker,
    /// Acknowledge once every earlier command has been processed
    Drain(mpsc::Sender<()>),
}

impl Command {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Command::EnqueueEvent(_) => "enqueue_event",
            Command::CheckConfigure(_) => "check_configure",
            Command::FlushNow => "flush_now",
            Command::FlushDelayed { .. } => "flush_delayed",
            Command::KillWorker => "kill_worker",
            Command::Drain(_) => "drain",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::EnqueueEvent(event) => f.debug_tuple("EnqueueEvent").field(event).finish(),
            Command::FlushDelayed { tag, fire_at } => f
                .debug_struct("FlushDelayed")
                .field("tag", tag)
                .field("fire_at", fire_at)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}
