//! Gjallarhorn - versioned datafile distribution with push-based cache
//! coherence
//!
//! This crate keeps a fleet of decision-making clients coherent with a
//! remote origin serving versioned JSON configuration documents
//! ("datafiles"). A central manager owns the authoritative per-key
//! cache and refresh protocol; subscribers hold a local mirror kept
//! current over a WebSocket fan-out channel, swapping their
//! decision-engine instances atomically as new revisions arrive.
//!
//! # Manager Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gjallarhorn::{ActiveKeySet, DatafileCache, EventBus, HttpFetcher, RefreshCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> gjallarhorn::Result<()> {
//!     let cache = Arc::new(DatafileCache::new());
//!     let active = Arc::new(ActiveKeySet::new());
//!     let bus = EventBus::new(256);
//!     let fetcher = Arc::new(HttpFetcher::new(
//!         "https://cdn.example.com/datafiles/{KEY}.json",
//!     ));
//!     let coordinator = RefreshCoordinator::new(cache, active, fetcher, bus);
//!
//!     let record = coordinator.refresh("my-sdk-key", false).await?;
//!     println!("serving revision {}", record.revision);
//!     Ok(())
//! }
//! ```
//!
//! # Subscriber Example (requires `client` feature)
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use gjallarhorn::mirror::supervisor::{self, BackoffConfig};
//! use gjallarhorn::{HttpFetcher, Mirror};
//!
//! let mirror = Arc::new(
//!     Mirror::new(my_engine_factory)
//!         .with_source(Arc::new(HttpFetcher::new(
//!             "http://manager:2222/datafile/json/{KEY}",
//!         ))),
//! );
//! supervisor::spawn(mirror.clone(), "ws://manager:2222/ws".into(), BackoffConfig::new());
//! ```

pub mod cache;
#[cfg(any(feature = "server", feature = "client"))]
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod mirror;
pub mod refresh;
pub mod rpc;
#[cfg(feature = "server")]
pub mod server;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use cache::{ActiveKeySet, DatafileCache};
pub use engine::{Attributes, DecisionEngine, EngineFactory, VariableKind};
pub use error::{GjallarhornError, Result};
pub use events::{ChangeEvent, EventBus};
pub use fetcher::{DatafileSource, HttpFetcher};
pub use mirror::{Mirror, MirrorEvent};
pub use refresh::{RefreshCoordinator, RefreshReport};
pub use rpc::{MethodRegistry, MethodSpec, RpcMethod};
pub use types::{DatafileRecord, SdkKeysPayload, WirePush, WireRequest};
