//! Collector and configure endpoint clients
//!
//! ## Wire protocol
//!
//! Batches are POSTed as a form with two fields:
//!
//! ```text
//! data_list=<base64(gzip(json_array))>&gzip=1
//! ```
//!
//! Every request carries a fixed `User-Agent`; debug-only mode adds
//! `Dry-Run: true`. Only HTTP 200 counts as delivered.

mod fetcher;
mod transport;

pub use fetcher::{fetch_configure, parse_event_bindings, ResultSink};
pub use transport::{
    CollectorRequest, HttpReply, ReqwestTransport, Transport, DRY_RUN_HEADER, USER_AGENT,
};
