//! Request payload validation.
//!
//! The HTTP surface accepts `{"sdk_keys": [..]}` bodies. Validation
//! happens before any fetch or broadcast; violations surface as
//! [`GjallarhornError::Validation`] and are reported to the caller as
//! `{"status": "error", "message": ..}`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GjallarhornError, Result};

/// The `sdk_keys` payload shared by the datafile update endpoints.
///
/// Constraints: at least one key, every key a non-empty string, no
/// duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkKeysPayload {
    pub sdk_keys: Vec<String>,
}

impl SdkKeysPayload {
    /// Parse and validate a raw JSON body.
    pub fn parse(value: &Value) -> Result<Self> {
        let payload: SdkKeysPayload = serde_json::from_value(value.clone())
            .map_err(|e| GjallarhornError::Validation(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Check the payload constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sdk_keys.is_empty() {
            return Err(GjallarhornError::Validation(
                "sdk_keys must contain at least one key".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for key in &self.sdk_keys {
            if key.is_empty() {
                return Err(GjallarhornError::Validation(
                    "sdk_keys entries must be non-empty strings".to_string(),
                ));
            }
            if !seen.insert(key.as_str()) {
                return Err(GjallarhornError::Validation(format!(
                    "duplicate sdk_key: {key:?}"
                )));
            }
        }
        Ok(())
    }
}
