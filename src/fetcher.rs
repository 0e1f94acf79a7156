//! Origin fetcher boundary.
//!
//! [`DatafileSource`] is the seam between the refresh protocol and
//! whatever serves documents — the CDN in production, a mock in tests,
//! the manager's own HTTP surface on the subscriber side.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::telemetry;
use crate::{GjallarhornError, Result};

/// Placeholder substituted with the SDK key when expanding a URL template.
pub const KEY_PLACEHOLDER: &str = "{KEY}";

/// Default origin template (the public CDN layout).
pub const DEFAULT_ORIGIN_TEMPLATE: &str = "https://cdn.optimizely.com/datafiles/{KEY}.json";

/// Anything that can produce the current document for a key.
#[async_trait]
pub trait DatafileSource: Send + Sync {
    /// Download and parse the document for `key`.
    ///
    /// Fails with [`GjallarhornError::Fetch`] on network errors, non-2xx
    /// responses, or non-JSON bodies.
    async fn fetch(&self, key: &str) -> Result<Value>;
}

/// Expand a `{KEY}` URL template for a concrete key.
pub fn expand_template(template: &str, key: &str) -> String {
    template.replace(KEY_PLACEHOLDER, key)
}

/// HTTP implementation of [`DatafileSource`].
pub struct HttpFetcher {
    client: reqwest::Client,
    template: String,
}

impl HttpFetcher {
    /// Create a fetcher for the given URL template.
    pub fn new(template: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), template)
    }

    /// Create a fetcher reusing an existing HTTP client.
    pub fn with_client(client: reqwest::Client, template: impl Into<String>) -> Self {
        Self {
            client,
            template: template.into(),
        }
    }

    /// The configured URL template.
    pub fn template(&self) -> &str {
        &self.template
    }
}

#[async_trait]
impl DatafileSource for HttpFetcher {
    async fn fetch(&self, key: &str) -> Result<Value> {
        let url = expand_template(&self.template, key);
        debug!(key, %url, "fetching datafile");
        let start = Instant::now();

        let result = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| GjallarhornError::Fetch(format!("GET {url}: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(GjallarhornError::Fetch(format!("GET {url}: HTTP {status}")));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| GjallarhornError::Fetch(format!("GET {url}: invalid JSON body: {e}")))
        }
        .await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::FETCHES_TOTAL, "status" => status).increment(1);
        metrics::histogram!(telemetry::FETCH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_expansion() {
        assert_eq!(
            expand_template(DEFAULT_ORIGIN_TEMPLATE, "abc123"),
            "https://cdn.optimizely.com/datafiles/abc123.json"
        );
    }

    #[test]
    fn template_without_placeholder_is_left_alone() {
        assert_eq!(expand_template("https://example.com/fixed.json", "abc"),
                   "https://example.com/fixed.json");
    }
}
