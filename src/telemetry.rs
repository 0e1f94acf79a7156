//! Telemetry metric name constants.
//!
//! Centralised metric names for gjallarhorn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `gjallarhorn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status` — outcome: "ok" or "error"
//! - `outcome` — refresh result: "updated", "unchanged", "degraded", "failed"
//! - `event` — change-event variant (e.g. "keys_changed", "document_changed")
//! - `method` — RPC operation name (e.g. "experiment", "track")

/// Total origin fetches attempted.
///
/// Labels: `status` ("ok" | "error").
pub const FETCHES_TOTAL: &str = "gjallarhorn_fetches_total";

/// Origin fetch duration in seconds.
pub const FETCH_DURATION_SECONDS: &str = "gjallarhorn_fetch_duration_seconds";

/// Lazy refreshes answered from the datafile cache.
pub const CACHE_HITS_TOTAL: &str = "gjallarhorn_cache_hits_total";

/// Lazy refreshes that had to go to the origin.
pub const CACHE_MISSES_TOTAL: &str = "gjallarhorn_cache_misses_total";

/// Refresh operations by outcome.
///
/// Labels: `outcome` ("updated" | "unchanged" | "degraded" | "failed").
pub const REFRESHES_TOTAL: &str = "gjallarhorn_refreshes_total";

/// Change events published on the bus.
///
/// Labels: `event`.
pub const EVENTS_TOTAL: &str = "gjallarhorn_events_total";

/// Wire pushes delivered to individual subscribers.
///
/// Labels: `event`.
pub const PUSHES_TOTAL: &str = "gjallarhorn_pushes_total";

/// Currently connected fan-out subscribers (gauge).
pub const SUBSCRIBERS: &str = "gjallarhorn_subscribers";

/// RPC batch operations dispatched.
///
/// Labels: `method`, `status` ("ok" | "error").
pub const RPC_REQUESTS_TOTAL: &str = "gjallarhorn_rpc_requests_total";
