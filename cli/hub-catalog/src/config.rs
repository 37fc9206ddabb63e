//! Configuration types for hub client construction.

use std::collections::BTreeMap;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// First segment of every cache key built by [crate::KeyScheme].
pub const DEFAULT_NAMESPACE: &str = "hub";

/// Configuration for hub client construction.
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    /// Base URL of the hub API. Trailing slashes are stripped.
    pub base_url: String,
    /// Headers sent with every request.
    ///
    /// When `None`, requests only carry `Accept: application/json`.
    pub default_headers: Option<BTreeMap<String, String>>,
    /// User agent of the underlying HTTP client.
    pub user_agent: Option<String>,
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_headers: None,
            user_agent: None,
        }
    }
}

impl HubClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}
