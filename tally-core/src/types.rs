//! Core domain types for tally
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | An analytics record submitted by a producer thread |
//! | **Table** | The logical queue an event is stored under |
//! | **Batch** | The oldest pending rows read for one flush attempt |
//! | **Lifecycle** | Whether the dispatch worker still accepts work |

use serde_json::Value;
use std::fmt;

/// Logical table in the queue store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Pending analytics events
    Events,
}

impl Table {
    /// Name stored in the `queue.tbl` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Events => "events",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An analytics event.
///
/// The body is opaque to the dispatcher; it only has to be a JSON object to
/// be accepted by the queue store.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    table: Table,
    body: Value,
}

impl Event {
    /// Create an event for the events table
    pub fn new(body: Value) -> Self {
        Self {
            table: Table::Events,
            body,
        }
    }

    /// Parse an event from JSON text
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(Self::new(serde_json::from_str(text)?))
    }

    /// Logical table this event is stored under
    pub fn table(&self) -> Table {
        self.table
    }

    /// Event body
    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl From<Value> for Event {
    fn from(body: Value) -> Self {
        Self::new(body)
    }
}

/// The oldest pending rows of a table, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Highest row id included; the purge cutoff after a successful send
    pub max_id: i64,
    /// Number of rows in the batch
    pub len: usize,
    /// JSON array text of the rows in id order
    pub payload: String,
}

/// Worker lifecycle state. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Alive,
    Dead,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_defaults_to_events_table() {
        let event = Event::new(json!({"e": "a"}));
        assert_eq!(event.table(), Table::Events);
        assert_eq!(event.table().to_string(), "events");
    }

    #[test]
    fn test_event_from_json() {
        let event = Event::from_json(r#"{"event":"signup","properties":{"plan":"pro"}}"#).unwrap();
        assert_eq!(event.body()["properties"]["plan"], "pro");
        assert!(Event::from_json("{not json").is_err());
    }
}
