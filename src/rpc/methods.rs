//! Built-in decision operations.
//!
//! Each operation validates its parameter object before touching the
//! engine, resolves the engine instance through the mirror (optional
//! `sdk_key` param, falling back to the configured default key), and
//! echoes the request object back with the result fields filled in.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{MethodRegistry, MethodSpec, RpcMethod};
use crate::engine::{Attributes, DecisionEngine, VariableKind};
use crate::mirror::Mirror;
use crate::{GjallarhornError, Result};

/// Shared state handed to every built-in operation.
pub struct MethodContext {
    pub mirror: Arc<Mirror>,
    /// Key used when a request does not name one.
    pub default_key: Option<String>,
}

impl MethodContext {
    pub fn new(mirror: Arc<Mirror>, default_key: Option<String>) -> Self {
        Self {
            mirror,
            default_key,
        }
    }

    /// Register every built-in operation.
    pub fn register_all(self: &Arc<Self>, registry: &mut MethodRegistry) {
        registry.register(Arc::new(Experiment(Arc::clone(self))));
        registry.register(Arc::new(Track(Arc::clone(self))));
        registry.register(Arc::new(Features(Arc::clone(self))));
        registry.register(Arc::new(GetVariation(Arc::clone(self))));
        registry.register(Arc::new(SetForcedVariation(Arc::clone(self))));
        registry.register(Arc::new(GetForcedVariation(Arc::clone(self))));
        registry.register(Arc::new(GetEnabledFeatures(Arc::clone(self))));
    }

    /// Resolve the engine instance an operation should evaluate against.
    async fn engine_for(&self, sdk_key: Option<&str>) -> Result<Arc<dyn DecisionEngine>> {
        let key = sdk_key
            .or(self.default_key.as_deref())
            .ok_or_else(|| {
                GjallarhornError::Validation(
                    "no sdk_key provided and no default configured".to_string(),
                )
            })?;
        self.mirror.instance(key).await
    }
}

/// Deserialize a parameter object, mapping failures to validation
/// errors.
fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    if !params.is_object() {
        return Err(GjallarhornError::Validation(
            "undefined or invalid JSON object".to_string(),
        ));
    }
    serde_json::from_value(params).map_err(|e| GjallarhornError::Validation(e.to_string()))
}

/// Request type catalogue served by `/describe`.
pub fn request_types() -> Value {
    json!({
        "experiment": {
            "description": "the details of the experiment",
            "props": {
                "experiment_key": ["string", "required"],
                "user_id": ["string", "required"],
                "attributes": ["object", "optional"],
                "variation_key": ["string", "returned variation key"],
                "sdk_key": ["string", "optional - overrides the configured default"],
            },
        },
        "features": {
            "description": "the details of a feature test",
            "props": {
                "feature_key": ["string", "required"],
                "user_id": ["string", "required"],
                "attributes": ["object", "optional"],
                "feature_test_key": ["string", "optional - if variation is needed in response"],
                "variation_key": ["string", "returns variation key"],
                "is_enabled": ["boolean", "returned \"true\" if feature is enabled"],
                "feature_config": ["object", "returns feature variable values"],
                "sdk_key": ["string", "optional - overrides the configured default"],
            },
        },
        "track": {
            "description": "the details of the track conversion event",
            "props": {
                "event_key": ["string", "required"],
                "user_id": ["string", "required"],
                "attributes": ["object", "optional"],
                "tags": ["object", "optional"],
                "acknowledgement": ["string", "returned conversion result"],
                "sdk_key": ["string", "optional - overrides the configured default"],
            },
        },
    })
}

#[derive(Debug, Deserialize)]
struct ExperimentParams {
    experiment_key: String,
    user_id: String,
    #[serde(default)]
    attributes: Attributes,
    sdk_key: Option<String>,
}

/// `experiment` — activate an experiment and return the variation.
struct Experiment(Arc<MethodContext>);

#[async_trait]
impl RpcMethod for Experiment {
    fn spec(&self) -> MethodSpec {
        MethodSpec {
            name: "experiment",
            description: "activates the experiment, and returns the assigned variation",
            params: &["expObj: the experiment object"],
            returns: &["expObj: object with variation key assigned"],
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: ExperimentParams = parse_params(params)?;
        let engine = self.0.engine_for(params.sdk_key.as_deref()).await?;
        let variation_key =
            engine.activate(&params.experiment_key, &params.user_id, &params.attributes);
        Ok(json!({
            "experiment_key": params.experiment_key,
            "user_id": params.user_id,
            "attributes": params.attributes,
            "variation_key": variation_key,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct TrackParams {
    event_key: String,
    user_id: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    tags: Value,
    sdk_key: Option<String>,
}

/// `track` — record a conversion event.
struct Track(Arc<MethodContext>);

#[async_trait]
impl RpcMethod for Track {
    fn spec(&self) -> MethodSpec {
        MethodSpec {
            name: "track",
            description: "track a conversion event",
            params: &["trackObj: the track event object"],
            returns: &["trackObj: event object with acknowledgement"],
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: TrackParams = parse_params(params)?;
        let engine = self.0.engine_for(params.sdk_key.as_deref()).await?;
        engine.track(
            &params.event_key,
            &params.user_id,
            &params.attributes,
            &params.tags,
        );
        Ok(json!({
            "event_key": params.event_key,
            "user_id": params.user_id,
            "attributes": params.attributes,
            "tags": params.tags,
            "acknowledgement": "success",
        }))
    }
}

#[derive(Debug, Deserialize)]
struct FeaturesParams {
    feature_key: String,
    user_id: String,
    #[serde(default)]
    attributes: Attributes,
    feature_test_key: Option<String>,
    #[serde(default)]
    feature_config: serde_json::Map<String, Value>,
    sdk_key: Option<String>,
}

/// `features` — feature flag check plus variable resolution.
struct Features(Arc<MethodContext>);

#[async_trait]
impl RpcMethod for Features {
    fn spec(&self) -> MethodSpec {
        MethodSpec {
            name: "features",
            description: "activates a feature flag or feature test and returns the variable values if any",
            params: &["featuresObj: the features object"],
            returns: &["featuresObj: object with the variable values if requested"],
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: FeaturesParams = parse_params(params)?;
        let engine = self.0.engine_for(params.sdk_key.as_deref()).await?;

        let is_enabled =
            engine.is_feature_enabled(&params.feature_key, &params.user_id, &params.attributes);

        let mut variation_key = None;
        let mut feature_config = params.feature_config;
        if is_enabled {
            if let Some(test_key) = params.feature_test_key.as_deref().filter(|k| !k.is_empty()) {
                variation_key = engine.variation(test_key, &params.user_id, &params.attributes);
            }
            // The caller declares each variable's type; unknown
            // declarations resolve to null.
            for (name, declared) in feature_config.iter_mut() {
                let kind = declared.as_str().and_then(|s| match s {
                    "boolean" => Some(VariableKind::Boolean),
                    "double" => Some(VariableKind::Double),
                    "integer" => Some(VariableKind::Integer),
                    "string" => Some(VariableKind::String),
                    _ => None,
                });
                *declared = match kind {
                    Some(kind) => engine
                        .feature_variable(
                            &params.feature_key,
                            name,
                            kind,
                            &params.user_id,
                            &params.attributes,
                        )
                        .unwrap_or(Value::Null),
                    None => Value::Null,
                };
            }
        }

        Ok(json!({
            "feature_key": params.feature_key,
            "user_id": params.user_id,
            "attributes": params.attributes,
            "feature_test_key": params.feature_test_key,
            "is_enabled": is_enabled,
            "variation_key": variation_key,
            "feature_config": feature_config,
        }))
    }
}

/// `get_variation` — variation lookup without activation.
struct GetVariation(Arc<MethodContext>);

#[async_trait]
impl RpcMethod for GetVariation {
    fn spec(&self) -> MethodSpec {
        MethodSpec {
            name: "get_variation",
            description: "returns the variation for an experiment or feature test",
            params: &["expObj: the get_variation object"],
            returns: &["expObj: object with variation key assigned"],
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: ExperimentParams = parse_params(params)?;
        let engine = self.0.engine_for(params.sdk_key.as_deref()).await?;
        let variation_key =
            engine.variation(&params.experiment_key, &params.user_id, &params.attributes);
        Ok(json!({
            "experiment_key": params.experiment_key,
            "user_id": params.user_id,
            "attributes": params.attributes,
            "variation_key": variation_key,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ForcedVariationParams {
    experiment_key: String,
    user_id: String,
    variation_key: Option<String>,
    sdk_key: Option<String>,
}

/// `set_forced_variation` — pin a user to a variation.
struct SetForcedVariation(Arc<MethodContext>);

#[async_trait]
impl RpcMethod for SetForcedVariation {
    fn spec(&self) -> MethodSpec {
        MethodSpec {
            name: "set_forced_variation",
            description: "sets an experiment or feature test variation",
            params: &["expObj: the set_forced_variation object"],
            returns: &["expObj: object with \"variation_forced\" boolean result of true or false"],
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: ForcedVariationParams = parse_params(params)?;
        let variation_key = params.variation_key.ok_or_else(|| {
            GjallarhornError::Validation("variation_key is required".to_string())
        })?;
        let engine = self.0.engine_for(params.sdk_key.as_deref()).await?;
        let variation_forced =
            engine.set_forced_variation(&params.experiment_key, &params.user_id, &variation_key);
        Ok(json!({
            "experiment_key": params.experiment_key,
            "user_id": params.user_id,
            "variation_key": variation_key,
            "variation_forced": variation_forced,
        }))
    }
}

/// `get_forced_variation` — read back a pinned variation.
struct GetForcedVariation(Arc<MethodContext>);

#[async_trait]
impl RpcMethod for GetForcedVariation {
    fn spec(&self) -> MethodSpec {
        MethodSpec {
            name: "get_forced_variation",
            description: "returns the forced variation set by set_forced_variation, or null if no variation was forced",
            params: &["expObj: the get_forced_variation object"],
            returns: &["expObj: object with the \"variation_key\" value if a variation was forced"],
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: ForcedVariationParams = parse_params(params)?;
        let engine = self.0.engine_for(params.sdk_key.as_deref()).await?;
        let variation_key = engine.forced_variation(&params.experiment_key, &params.user_id);
        Ok(json!({
            "experiment_key": params.experiment_key,
            "user_id": params.user_id,
            "variation_key": variation_key,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct EnabledFeaturesParams {
    user_id: String,
    #[serde(default)]
    attributes: Attributes,
    sdk_key: Option<String>,
}

/// `get_enabled_features` — every feature enabled for a user.
struct GetEnabledFeatures(Arc<MethodContext>);

#[async_trait]
impl RpcMethod for GetEnabledFeatures {
    fn spec(&self) -> MethodSpec {
        MethodSpec {
            name: "get_enabled_features",
            description: "retrieves a list of all the features that are enabled for the user",
            params: &["featuresObj: the get_enabled_features object"],
            returns: &["featuresObj: object that contains the property \"features_list\" with a list of keys corresponding to the features that are enabled"],
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: EnabledFeaturesParams = parse_params(params)?;
        let engine = self.0.engine_for(params.sdk_key.as_deref()).await?;
        let features_list = engine.enabled_features(&params.user_id, &params.attributes);
        Ok(json!({
            "user_id": params.user_id,
            "attributes": params.attributes,
            "features_list": features_list,
        }))
    }
}
