//! Datafile manager service surface.
//!
//! This module provides:
//! - The shared application state (`AppState`)
//! - The HTTP endpoints driving refreshes (`routes`)
//! - The WebSocket fan-out hub (`fanout`)
//!
//! The WebSocket endpoint is mounted at `/ws` on the same listener as
//! the HTTP surface; one physical connection per subscriber gives the
//! per-connection delivery-order guarantee.

pub mod fanout;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};

use crate::cache::{ActiveKeySet, DatafileCache};
use crate::events::EventBus;
use crate::refresh::RefreshCoordinator;

/// Default interval between liveness probes.
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// State shared by every route handler and subscriber connection.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DatafileCache>,
    pub active: Arc<ActiveKeySet>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub bus: EventBus,
    /// Interval between subscriber liveness probes; a connection that
    /// misses a whole interval without ponging is dropped.
    pub probe_interval: Duration,
}

impl AppState {
    /// Assemble the manager state.
    pub fn new(
        cache: Arc<DatafileCache>,
        active: Arc<ActiveKeySet>,
        coordinator: Arc<RefreshCoordinator>,
        bus: EventBus,
    ) -> Self {
        Self {
            cache,
            active,
            coordinator,
            bus,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    /// Override the liveness probe interval.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }
}

/// Build the manager router: HTTP surface plus the `/ws` fan-out
/// endpoint.
///
/// Serve with connect-info so the fan-out greeting can report the peer
/// address:
///
/// ```ignore
/// let app = gjallarhorn::server::router(state);
/// axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
/// ```
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::health))
        .route("/datafile_update", post(routes::datafile_update))
        .route("/datafile_full_refresh", post(routes::datafile_full_refresh))
        .route("/update_sdk_keys", post(routes::update_sdk_keys))
        .route("/datafile/json/:key", get(routes::datafile_json))
        .route("/ws", get(fanout::ws_handler))
        .with_state(state)
}
