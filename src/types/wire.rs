//! Fan-out channel wire format.
//!
//! Every message, in both directions, is a single JSON object carrying a
//! `type` discriminator. Subscribers send [`WireRequest`]s; the manager
//! answers and broadcasts [`WirePush`]es. A subscriber must tolerate a
//! push arriving between a request and that request's reply — the channel
//! only guarantees per-connection ordering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-bound messages (subscriber → manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireRequest {
    /// Ask for the current active key set.
    GetSdkKeys,
    /// Ask for every active datafile, one push per key.
    GetDatafiles,
}

/// Client-bound messages (manager → subscriber).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePush {
    /// The active key set, sent wholesale on change or on request.
    ActiveSdkKeys { data: Vec<String> },
    /// A single datafile, tagged with the key it belongs to.
    ActiveDatafile { data: Value, id: String },
    /// Free-form diagnostic text, no contract implication.
    ServerMessage { data: String },
}

impl WirePush {
    /// Discriminator string, used as a metrics label.
    pub fn event_type(&self) -> &'static str {
        match self {
            WirePush::ActiveSdkKeys { .. } => "active_sdk_keys",
            WirePush::ActiveDatafile { .. } => "active_datafile",
            WirePush::ServerMessage { .. } => "server_message",
        }
    }
}
