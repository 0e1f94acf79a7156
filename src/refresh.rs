//! Refresh protocol: single-flight downloads, full vs. incremental
//! refresh, change notification.
//!
//! The coordinator decides, per key, whether to serve the cached
//! document or go to the origin, and is the only writer of the
//! [`DatafileCache`]. Concurrent callers for the same key collapse onto
//! one in-flight fetch: the first caller becomes the leader and owns the
//! per-key token, later callers await the leader's result over a
//! broadcast channel. A bounded fetch timeout guarantees the token is
//! always released, so a hung origin never deadlocks later callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::cache::{ActiveKeySet, DatafileCache, dedup_keys};
use crate::events::{ChangeEvent, EventBus};
use crate::fetcher::DatafileSource;
use crate::telemetry;
use crate::types::DatafileRecord;
use crate::{GjallarhornError, Result};

/// Default bound on a single origin fetch.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Result shared with callers waiting on an in-flight fetch.
///
/// The error side is a plain string so the value is `Clone`-able across
/// the broadcast channel.
type InflightResult = std::result::Result<Arc<DatafileRecord>, String>;

/// Per-key outcome of a multi-key refresh.
#[derive(Debug, Clone)]
pub struct KeyOutcome {
    pub key: String,
    /// Committed revision on success, error message on failure.
    pub result: std::result::Result<u64, String>,
}

/// Aggregated outcomes of [`RefreshCoordinator::update`] or
/// [`RefreshCoordinator::full_refresh`]. One key's failure never aborts
/// the others; callers inspect the report to see which keys made it.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    outcomes: Vec<KeyOutcome>,
}

impl RefreshReport {
    /// All per-key outcomes, in request order.
    pub fn outcomes(&self) -> &[KeyOutcome] {
        &self.outcomes
    }

    /// Keys that refreshed successfully.
    pub fn succeeded(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.key.clone())
            .collect()
    }

    /// Keys that failed, with their error messages.
    pub fn failed(&self) -> Vec<(String, String)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                Ok(_) => None,
                Err(message) => Some((o.key.clone(), message.clone())),
            })
            .collect()
    }

    /// Whether every key refreshed successfully.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Owns the refresh state machine for every key.
pub struct RefreshCoordinator {
    cache: Arc<DatafileCache>,
    active: Arc<ActiveKeySet>,
    source: Arc<dyn DatafileSource>,
    bus: EventBus,
    fetch_timeout: Duration,
    /// Pending-refresh tokens: at most one per key at any time.
    inflight: Mutex<HashMap<String, broadcast::Sender<InflightResult>>>,
}

impl RefreshCoordinator {
    /// Create a coordinator over the given cache, key set and source.
    pub fn new(
        cache: Arc<DatafileCache>,
        active: Arc<ActiveKeySet>,
        source: Arc<dyn DatafileSource>,
        bus: EventBus,
    ) -> Self {
        Self {
            cache,
            active,
            source,
            bus,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Set the bound on a single origin fetch.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// The cache this coordinator writes.
    pub fn cache(&self) -> &Arc<DatafileCache> {
        &self.cache
    }

    /// The active key set this coordinator maintains.
    pub fn active(&self) -> &Arc<ActiveKeySet> {
        &self.active
    }

    /// Serve the document for `key`, fetching when needed.
    ///
    /// With `force == false` a cached record is returned immediately.
    /// Otherwise the call joins the in-flight fetch for the key if one
    /// exists, or becomes the leader and fetches itself. On fetch
    /// failure the last-known-good cached record is served when one
    /// exists; the error propagates only when the cache is empty too.
    pub async fn refresh(&self, key: &str, force: bool) -> Result<Arc<DatafileRecord>> {
        if !force {
            if let Some(record) = self.cache.get(key) {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                return Ok(record);
            }
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        }

        // Single-flight gate. Either join an existing token or plant ours.
        let mut waiter = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    inflight.insert(key.to_string(), tx);
                    None
                }
            }
        };

        if let Some(rx) = waiter.as_mut() {
            debug!(key, "awaiting in-flight refresh");
            return match rx.recv().await {
                Ok(Ok(record)) => Ok(record),
                Ok(Err(message)) => Err(GjallarhornError::Fetch(message)),
                Err(_) => Err(GjallarhornError::Fetch(format!(
                    "in-flight refresh for {key:?} was dropped"
                ))),
            };
        }

        // Leader path: fetch, then release the token and notify waiters.
        // Removal and send happen under the lock so a caller that saw the
        // token can never miss the result.
        let outcome = self.fetch_and_store(key).await;
        {
            let mut inflight = self.inflight.lock().await;
            if let Some(tx) = inflight.remove(key) {
                let shared = match &outcome {
                    Ok(record) => Ok(Arc::clone(record)),
                    Err(error) => Err(error.to_string()),
                };
                let _ = tx.send(shared);
            }
        }
        outcome
    }

    /// Incremental refresh: force-refresh the listed keys and register
    /// the ones that succeeded. Keys not listed keep their cached
    /// records.
    pub async fn update(&self, keys: Vec<String>) -> RefreshReport {
        let keys = dedup_keys(keys);
        info!(keys = ?keys, "datafile update");
        let report = self.refresh_many(&keys).await;
        self.active.merge(&report.succeeded());
        report
    }

    /// Full refresh: evict every record of the current active set,
    /// replace the set with `keys`, and force-refresh each new key.
    ///
    /// Always evicts-then-refetches; there is no key-list comparison
    /// shortcut.
    pub async fn full_refresh(&self, keys: Vec<String>) -> RefreshReport {
        let previous = self.active.snapshot();
        self.cache.evict_all(&previous);
        let keys = self.active.replace(keys);
        info!(previous = ?previous, keys = ?keys, "datafile full refresh");
        self.refresh_many(&keys).await
    }

    /// Spawn a background task that force-refreshes the active key set
    /// on a fixed interval. The original push-only flow needs no
    /// polling; this covers origins without webhooks.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // An interval's first tick completes immediately; the boot
            // refresh already covered that.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let keys = coordinator.active.snapshot();
                if keys.is_empty() {
                    continue;
                }
                debug!(count = keys.len(), "periodic datafile refresh");
                let report = coordinator.refresh_many(&keys).await;
                for (key, error) in report.failed() {
                    warn!(key, error, "periodic refresh failed");
                }
            }
        })
    }

    /// Force-refresh every listed key concurrently. Safe because each
    /// key's single-flight guard is independent.
    async fn refresh_many(&self, keys: &[String]) -> RefreshReport {
        let outcomes = futures_util::future::join_all(keys.iter().map(|key| async move {
            match self.refresh(key, true).await {
                Ok(record) => KeyOutcome {
                    key: key.clone(),
                    result: Ok(record.revision),
                },
                Err(error) => KeyOutcome {
                    key: key.clone(),
                    result: Err(error.to_string()),
                },
            }
        }))
        .await;
        RefreshReport { outcomes }
    }

    /// Fetch one key from the origin, commit the record, and notify when
    /// the revision advanced.
    async fn fetch_and_store(&self, key: &str) -> Result<Arc<DatafileRecord>> {
        let previous_revision = self.cache.revision(key);

        let document = match tokio::time::timeout(self.fetch_timeout, self.source.fetch(key)).await
        {
            Ok(Ok(document)) => document,
            Ok(Err(error)) => return self.degrade(key, error),
            Err(_) => {
                return self.degrade(
                    key,
                    GjallarhornError::Fetch(format!(
                        "fetch for {key:?} timed out after {:?}",
                        self.fetch_timeout
                    )),
                );
            }
        };

        let record = match DatafileRecord::new(key, document) {
            Ok(record) => record,
            Err(error) => return self.degrade(key, error),
        };

        let record = self.cache.put(record);
        info!(key, revision = record.revision, "datafile refreshed");

        match previous_revision {
            // A refresh that does not advance the revision still replaces
            // the cached copy but is not "changed" for notification
            // purposes.
            Some(previous) if record.revision <= previous => {
                metrics::counter!(telemetry::REFRESHES_TOTAL, "outcome" => "unchanged")
                    .increment(1);
                debug!(key, revision = record.revision, previous, "revision not advanced");
            }
            _ => {
                metrics::counter!(telemetry::REFRESHES_TOTAL, "outcome" => "updated").increment(1);
                self.bus.publish(ChangeEvent::DocumentChanged {
                    key: key.to_string(),
                    document: record.document.clone(),
                });
            }
        }

        Ok(record)
    }

    /// Serve the last-known-good record after a failed fetch, or
    /// propagate the error when nothing is cached.
    fn degrade(&self, key: &str, error: GjallarhornError) -> Result<Arc<DatafileRecord>> {
        warn!(key, error = %error, "datafile fetch failed");
        match self.cache.get(key) {
            Some(record) => {
                metrics::counter!(telemetry::REFRESHES_TOTAL, "outcome" => "degraded").increment(1);
                debug!(key, revision = record.revision, "serving last known good record");
                Ok(record)
            }
            None => {
                metrics::counter!(telemetry::REFRESHES_TOTAL, "outcome" => "failed").increment(1);
                Err(error)
            }
        }
    }
}
