//! fetchline — epoll-native pooled HTTP/1.1 client engine for Linux.
//!
//! fetchline multiplexes logical request submissions from arbitrary caller
//! threads onto a bounded pool of persistent TCP connections partitioned by
//! host. A small set of I/O worker threads drives the connect/send/receive
//! lifecycle of those sockets with a readiness-based epoll loop; each
//! submission resolves with a parsed response, a transport error, or a
//! timeout.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fetchline::Client;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), fetchline::Error> {
//!     let config = Client::options()
//!         .threads(2)
//!         .max_connections_per_host(4)
//!         .build()?;
//!     let client = Client::init(config)?;
//!
//!     let response = client
//!         .get("http://example.com/hello")
//!         .header("accept", "text/plain")
//!         .timeout(Duration::from_secs(5))
//!         .send()
//!         .wait()?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```
//!
//! # Model
//!
//! - One request in flight per connection; responses pair with requests by
//!   construction, no pipelining.
//! - Connections are leased Idle→Used with a lock-free CAS and released on
//!   completion; submissions that find no Idle slot park on a bounded
//!   per-host queue drained as connections free up.
//! - A connection is bound to one I/O worker for its whole life; foreign
//!   threads submit through an eventfd-signaled queue, the owning thread
//!   sends inline.
//!
//! # Platform
//!
//! Linux only: epoll, eventfd, and timerfd.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod connection;
pub(crate) mod parser;
pub(crate) mod poller;
pub(crate) mod pool;
pub(crate) mod resolver;
pub(crate) mod timer;
pub(crate) mod transport;

// ── Public modules ──────────────────────────────────────────────────────
pub mod completion;
pub mod config;
pub mod error;
pub mod metrics;
pub mod request;
pub mod response;

mod client;

// ── Re-exports ──────────────────────────────────────────────────────────

/// The client front door.
pub use client::Client;
/// Caller-side handle for a pending response.
pub use completion::Completion;
/// Engine configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Engine errors.
pub use error::Error;
/// Request body payload.
pub use request::Body;
/// HTTP request method.
pub use request::Method;
/// A logical HTTP request.
pub use request::Request;
/// Fluent request builder terminated by `send()`.
pub use request::RequestBuilder;
/// A fully buffered HTTP response.
pub use response::Response;
