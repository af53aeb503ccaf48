//! # tally-core
//!
//! Core library for tally - an asynchronous event-telemetry dispatcher.
//!
//! This library provides:
//! - A dispatch worker that queues analytics events from any thread and
//!   flushes them in batches to a remote collector
//! - A durable SQLite queue store
//! - The collector wire codec (gzip + base64) and HTTP transport
//! - A process-wide registry with one dispatcher per application
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tally_core::{AppContext, Config, Registry};
//!
//! let config = Config::load().expect("failed to load config");
//! let dispatcher = Registry::global()
//!     .get_instance(&AppContext::new("com.example.shop"), &config)
//!     .expect("failed to start dispatcher");
//!
//! dispatcher.submit_event(serde_json::json!({"event": "signup"}));
//! dispatcher.submit_flush(Duration::from_secs(15));
//! ```

// Re-export commonly used items at the crate root
pub use collector::{ResultSink, Transport};
pub use config::Config;
pub use dispatch::{Dispatcher, FlushTag};
pub use error::{Error, Result};
pub use registry::{AppContext, Registry};
pub use store::{QueueStore, SqliteQueueStore};
pub use types::*;

// Public modules
pub mod codec;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod network;
pub mod registry;
pub mod store;
pub mod types;
