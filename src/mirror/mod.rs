//! Subscriber-side cache mirror.
//!
//! Holds a local copy of the manager's state — active keys and, per key,
//! the last document received — plus the one piece of shared mutable
//! state on the subscriber side: the "current engine instance" pointer
//! per key.
//!
//! The pointer is an `arc-swap` slot. Re-derivation builds the full
//! engine first and publishes it with a single atomic store, so
//! evaluation calls never lock and never observe a half-constructed
//! instance: until the store completes they keep using the previous
//! instance.

#[cfg(feature = "client")]
pub mod supervisor;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{ActiveKeySet, DatafileCache};
use crate::engine::{DecisionEngine, EngineFactory};
use crate::fetcher::DatafileSource;
use crate::types::{DatafileRecord, WirePush};
use crate::{GjallarhornError, Result};

/// The published engine instance for one key.
pub struct EngineSlot {
    pub engine: Arc<dyn DecisionEngine>,
    pub revision: u64,
}

/// Local events emitted as pushes are applied, for embedding
/// applications that want to observe the mirror.
#[derive(Debug, Clone)]
pub enum MirrorEvent {
    /// A key's engine instance was swapped to a new revision.
    UpdatedDatafile { key: String, revision: u64 },
    /// The locally tracked active key list was replaced.
    UpdatedDatafileKeys { keys: Vec<String> },
}

/// Subscriber-local mirror of manager-held state.
pub struct Mirror {
    factory: Arc<dyn EngineFactory>,
    /// Where to fetch documents for key-only notifications and lazy
    /// instantiation. `None` restricts the mirror to inline-document
    /// pushes.
    source: Option<Arc<dyn DatafileSource>>,
    keys: ActiveKeySet,
    documents: DatafileCache,
    slots: RwLock<HashMap<String, Arc<ArcSwapOption<EngineSlot>>>>,
    events: broadcast::Sender<MirrorEvent>,
}

impl Mirror {
    /// Create a mirror that derives engines with `factory`.
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            factory,
            source: None,
            keys: ActiveKeySet::new(),
            documents: DatafileCache::new(),
            slots: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Attach a document source, enabling re-derivation from key-only
    /// notifications and lazy instantiation.
    pub fn with_source(mut self, source: Arc<dyn DatafileSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Subscribe to local mirror events.
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events.subscribe()
    }

    /// Locally tracked active keys.
    pub fn keys(&self) -> Vec<String> {
        self.keys.snapshot()
    }

    /// Last document received for a key.
    pub fn document(&self, key: &str) -> Option<Arc<DatafileRecord>> {
        self.documents.get(key)
    }

    /// Current engine instance for a key.
    ///
    /// Lock-free on the instance pointer; returns `None` until the first
    /// successful derivation.
    pub fn engine(&self, key: &str) -> Option<Arc<dyn DecisionEngine>> {
        let slot = self.slots.read().get(key).cloned()?;
        slot.load_full().map(|published| Arc::clone(&published.engine))
    }

    /// Revision of the currently published instance for a key.
    pub fn engine_revision(&self, key: &str) -> Option<u64> {
        let slot = self.slots.read().get(key).cloned()?;
        slot.load_full().map(|published| published.revision)
    }

    /// Current instance for a key, deriving it on demand.
    ///
    /// Evaluation calls that arrive before any push land here: the
    /// document is fetched from the configured source and the instance
    /// published like any other re-derivation.
    pub async fn instance(&self, key: &str) -> Result<Arc<dyn DecisionEngine>> {
        if let Some(engine) = self.engine(key) {
            return Ok(engine);
        }
        self.rederive(key).await?;
        self.engine(key).ok_or_else(|| {
            GjallarhornError::Instantiation(format!("no engine instance for {key:?}"))
        })
    }

    /// Apply an inline-document update: build the new engine, then
    /// atomically publish it together with the document copy.
    ///
    /// On factory failure nothing is touched — readers keep the previous
    /// instance.
    pub fn apply_document(&self, key: &str, document: serde_json::Value) -> Result<u64> {
        let record = DatafileRecord::new(key, document)?;
        let revision = record.revision;

        // Build fully before publishing anything.
        let engine = self.factory.create(&record.document)?;

        self.documents.put(record);
        self.keys.merge(std::slice::from_ref(&key.to_string()));
        self.slot(key)
            .store(Some(Arc::new(EngineSlot { engine, revision })));

        info!(key, revision, "engine instance swapped");
        self.emit(MirrorEvent::UpdatedDatafile {
            key: key.to_string(),
            revision,
        });
        Ok(revision)
    }

    /// Apply a key-list update: replace the local list and re-derive
    /// every key from the configured source. One key's failure never
    /// blocks the others.
    pub async fn apply_keys(&self, keys: Vec<String>) {
        if keys.is_empty() {
            debug!("ignoring empty active key list");
            return;
        }
        let keys = self.keys.replace(keys);
        self.emit(MirrorEvent::UpdatedDatafileKeys { keys: keys.clone() });
        for key in &keys {
            if let Err(error) = self.rederive(key).await {
                warn!(key, %error, "re-derivation failed");
            }
        }
    }

    /// Dispatch one incoming push from the fan-out channel.
    pub async fn apply_push(&self, push: WirePush) {
        match push {
            WirePush::ActiveSdkKeys { data } => self.apply_keys(data).await,
            WirePush::ActiveDatafile { data, id } => {
                if let Err(error) = self.apply_document(&id, data) {
                    warn!(key = %id, %error, "rejected datafile push");
                }
            }
            WirePush::ServerMessage { data } => debug!(message = %data, "server message"),
        }
    }

    /// Fetch the current document for a key and publish a fresh
    /// instance.
    async fn rederive(&self, key: &str) -> Result<u64> {
        let source = self.source.as_ref().ok_or_else(|| {
            GjallarhornError::Configuration(
                "no datafile source configured for key-only updates".to_string(),
            )
        })?;
        let document = source.fetch(key).await?;
        self.apply_document(key, document)
    }

    /// The swap slot for a key, created empty on first touch.
    fn slot(&self, key: &str) -> Arc<ArcSwapOption<EngineSlot>> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(ArcSwapOption::empty())),
        )
    }

    fn emit(&self, event: MirrorEvent) {
        let _ = self.events.send(event);
    }
}
