//! Decision-engine boundary.
//!
//! The evaluation engine (bucketing, targeting, variable resolution) is
//! an external collaborator — this crate only defines the seam it is
//! consumed through. Instances are built from a datafile document and
//! evaluated synchronously; both calls are assumed CPU-bound and
//! non-blocking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// User attributes passed through to every evaluation call.
pub type Attributes = serde_json::Map<String, Value>;

/// Type of a feature variable, as declared by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Boolean,
    Double,
    Integer,
    String,
}

/// One immutable decision-engine instance, built from a single datafile
/// revision.
///
/// Implementations must be internally synchronized: the batch dispatcher
/// runs sibling operations concurrently against the same instance.
pub trait DecisionEngine: std::fmt::Debug + Send + Sync {
    /// Revision of the datafile this instance was built from.
    fn revision(&self) -> u64;

    /// Activate an experiment and return the assigned variation key.
    fn activate(&self, experiment_key: &str, user_id: &str, attributes: &Attributes)
    -> Option<String>;

    /// Return the variation for an experiment or feature test without
    /// recording an activation.
    fn variation(&self, experiment_key: &str, user_id: &str, attributes: &Attributes)
    -> Option<String>;

    /// Force a user into a specific variation. Returns whether the
    /// override was accepted.
    fn set_forced_variation(&self, experiment_key: &str, user_id: &str, variation_key: &str)
    -> bool;

    /// The forced variation previously set for a user, if any.
    fn forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<String>;

    /// Whether a feature flag is enabled for a user.
    fn is_feature_enabled(&self, feature_key: &str, user_id: &str, attributes: &Attributes)
    -> bool;

    /// Resolve a feature variable of the declared kind.
    fn feature_variable(
        &self,
        feature_key: &str,
        variable_key: &str,
        kind: VariableKind,
        user_id: &str,
        attributes: &Attributes,
    ) -> Option<Value>;

    /// All features enabled for a user.
    fn enabled_features(&self, user_id: &str, attributes: &Attributes) -> Vec<String>;

    /// Record a conversion event.
    fn track(&self, event_key: &str, user_id: &str, attributes: &Attributes, tags: &Value);
}

/// Builds [`DecisionEngine`] instances from datafile documents.
pub trait EngineFactory: Send + Sync {
    /// Build a fresh instance from a document.
    ///
    /// Fails with [`GjallarhornError::Instantiation`](crate::GjallarhornError::Instantiation)
    /// when the document cannot drive an engine.
    fn create(&self, document: &Value) -> Result<Arc<dyn DecisionEngine>>;
}
