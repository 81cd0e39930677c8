//! Client engine metrics.
//!
//! Counters for request/response traffic, connection lifecycle, and queue
//! pressure. Exposed through the metriken registry for scraping by whatever
//! exposition layer the embedding application runs.

use metriken::{Counter, Gauge, metric};

// ── Requests ─────────────────────────────────────────────────────

#[metric(
    name = "fetchline/requests/submitted",
    description = "Total requests submitted to the client"
)]
pub static REQUESTS_SUBMITTED: Counter = Counter::new();

#[metric(
    name = "fetchline/requests/queued",
    description = "Requests parked on a per-host pending queue"
)]
pub static REQUESTS_QUEUED: Counter = Counter::new();

#[metric(
    name = "fetchline/requests/rejected",
    description = "Requests rejected because the pending queue was full"
)]
pub static REQUESTS_REJECTED: Counter = Counter::new();

#[metric(
    name = "fetchline/requests/timeout",
    description = "Requests that timed out in flight"
)]
pub static REQUEST_TIMEOUTS: Counter = Counter::new();

// ── Responses ────────────────────────────────────────────────────

#[metric(
    name = "fetchline/responses/received",
    description = "Responses fully parsed and delivered"
)]
pub static RESPONSES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "fetchline/responses/errors",
    description = "In-flight requests rejected with a transport error"
)]
pub static TRANSPORT_ERRORS: Counter = Counter::new();

// ── Connections ──────────────────────────────────────────────────

#[metric(
    name = "fetchline/connections/opened",
    description = "Outbound connections established"
)]
pub static CONNECTIONS_OPENED: Counter = Counter::new();

#[metric(
    name = "fetchline/connections/closed",
    description = "Connections closed"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(
    name = "fetchline/connections/active",
    description = "Currently established connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(name = "fetchline/bytes/sent", description = "Total bytes sent")]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(name = "fetchline/bytes/received", description = "Total bytes received")]
pub static BYTES_RECEIVED: Counter = Counter::new();
