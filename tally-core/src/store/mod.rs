//! Durable queue of pending events
//!
//! The dispatch worker is the only writer. Every implementation guards its
//! own state with a lock so other threads may inspect the queue through a
//! shared handle without racing the worker.

mod schema;
mod sqlite;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteQueueStore;

use crate::error::Result;
use crate::types::{Batch, Event, Table};

/// Append-only store of pending events, addressable by monotonic row id.
pub trait QueueStore: Send + Sync {
    /// Append an event, returning its row id.
    ///
    /// Fails with `Error::StoreFull` when the row ceiling is reached and
    /// `Error::Data` when the event is not a JSON object.
    fn insert(&self, table: Table, event: &Event) -> Result<i64>;

    /// Read up to `limit` of the oldest rows of `table`.
    fn read_oldest(&self, table: Table, limit: usize) -> Result<Option<Batch>>;

    /// Delete every row of `table` with id <= `upto_id`, returning the number deleted.
    fn purge(&self, table: Table, upto_id: i64) -> Result<usize>;

    /// Number of pending rows in `table`.
    fn count(&self, table: Table) -> Result<usize>;

    /// Delete everything.
    fn wipe_all(&self) -> Result<()>;
}
