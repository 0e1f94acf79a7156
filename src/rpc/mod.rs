//! RPC batch dispatcher.
//!
//! One inbound request object fans out to N named operations, resolved
//! against a [`MethodRegistry`], executed concurrently, and joined back
//! into a single response object keyed by the original operation names.
//! An operation that fails — or whose name is unknown — yields an error
//! payload for that key only; siblings always complete and report.
//! Only an empty or unparsable body fails the request as a whole.

pub mod methods;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::telemetry;
use crate::{GjallarhornError, Result};

/// Static description of one registered operation, surfaced by
/// `/describe`.
#[derive(Debug, Clone, Copy)]
pub struct MethodSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [&'static str],
    pub returns: &'static [&'static str],
}

/// One executable RPC operation.
#[async_trait]
pub trait RpcMethod: Send + Sync {
    /// Introspection metadata.
    fn spec(&self) -> MethodSpec;

    /// Execute with the caller-supplied parameter object.
    async fn execute(&self, params: Value) -> Result<Value>;
}

/// Name → operation table, in registration order.
#[derive(Default)]
pub struct MethodRegistry {
    methods: Vec<Arc<dyn RpcMethod>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation. A later registration under the same name
    /// shadows the earlier one.
    pub fn register(&mut self, method: Arc<dyn RpcMethod>) {
        self.methods.retain(|m| m.spec().name != method.spec().name);
        self.methods.push(method);
    }

    /// Look up an operation by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn RpcMethod>> {
        self.methods.iter().find(|m| m.spec().name == name)
    }

    /// Specs of every registered operation, in registration order.
    pub fn specs(&self) -> Vec<MethodSpec> {
        self.methods.iter().map(|m| m.spec()).collect()
    }
}

/// Dispatch one batch request body against the registry.
///
/// The response object maps each original operation name to its result
/// or `{"error": ..}` payload, preserving the caller's key order.
pub async fn dispatch(registry: &MethodRegistry, body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Err(GjallarhornError::Validation(
            "RPC request was expecting some data".to_string(),
        ));
    }
    let request: serde_json::Map<String, Value> = serde_json::from_str(body)
        .map_err(|e| GjallarhornError::Validation(format!("invalid RPC body: {e}")))?;
    if request.is_empty() {
        return Err(GjallarhornError::Validation(
            "RPC request contained no operations".to_string(),
        ));
    }

    let units = request.into_iter().map(|(name, params)| async move {
        let result = match registry.get(&name) {
            Some(method) => method.execute(params).await,
            None => Err(GjallarhornError::UnknownOperation(name.clone())),
        };
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::RPC_REQUESTS_TOTAL,
            "method" => name.clone(), "status" => status)
        .increment(1);

        let payload = match result {
            Ok(value) => value,
            Err(GjallarhornError::UnknownOperation(_)) => {
                debug!(method = %name, "unknown RPC method");
                json!({"error": "method is not defined"})
            }
            Err(error) => {
                debug!(method = %name, %error, "RPC method failed");
                json!({"error": error.to_string()})
            }
        };
        (name, payload)
    });

    // join_all preserves input order, and the preserve_order map keeps
    // it through assembly.
    let mut response = serde_json::Map::new();
    for (name, payload) in futures_util::future::join_all(units).await {
        response.insert(name, payload);
    }
    Ok(Value::Object(response))
}

/// Introspection payload for `/describe`: registered operation names,
/// descriptions, and the request type catalogue.
pub fn describe(registry: &MethodRegistry) -> Value {
    let mut methods = serde_json::Map::new();
    for spec in registry.specs() {
        methods.insert(
            spec.name.to_string(),
            json!({
                "description": spec.description,
                "params": spec.params,
                "returns": spec.returns,
            }),
        );
    }
    json!({
        "types": methods::request_types(),
        "methods": methods,
    })
}

#[cfg(feature = "client")]
pub use router::router;

#[cfg(feature = "client")]
mod router {
    use super::*;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    /// Build the decision-service HTTP surface: `POST /rpc` and
    /// `GET|POST /describe`.
    pub fn router(registry: Arc<MethodRegistry>) -> Router {
        Router::new()
            .route("/rpc", post(rpc_handler))
            .route("/describe", get(describe_handler).post(describe_handler))
            .with_state(registry)
    }

    async fn rpc_handler(State(registry): State<Arc<MethodRegistry>>, body: String) -> Response {
        match dispatch(&registry, &body).await {
            Ok(response) => Json(response).into_response(),
            Err(error) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": error.to_string()})),
            )
                .into_response(),
        }
    }

    async fn describe_handler(State(registry): State<Arc<MethodRegistry>>) -> Json<Value> {
        Json(describe(&registry))
    }
}
