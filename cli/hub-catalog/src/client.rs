//! Transport client for the hub API and the typed operations built on it.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use derive_more::From;
use reqwest::Method;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use crate::config::HubClientConfig;
use crate::error::{ApiErrorResponse, HubClientError};
use crate::mock::MockClient;
use crate::types::*;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Per-request overrides of the client defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Defaults to `GET`.
    pub method: Option<Method>,
    /// Merged over the default headers; a header named here replaces the
    /// default of the same name.
    pub headers: HeaderMap,
}

/// A client for the hub API.
///
/// Holds only the configuration captured at construction, so it can be
/// shared freely between tasks.
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HubClient {
    /// Create a new hub client from configuration.
    pub fn new(config: HubClientConfig) -> Result<Self, HubClientError> {
        let http = build_http_client(&config)?;
        Self::with_http_client(config, http)
    }

    /// Create a hub client that sends its requests through `http`.
    pub fn with_http_client(
        config: HubClientConfig,
        http: reqwest::Client,
    ) -> Result<Self, HubClientError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| {
            HubClientError::Configuration(format!("invalid base URL '{}': {e}", config.base_url))
        })?;

        let default_headers = match &config.default_headers {
            Some(headers) => header_map(headers)?,
            None => HeaderMap::from_iter([(
                header::ACCEPT,
                HeaderValue::from_static(JSON_CONTENT_TYPE),
            )]),
        };

        debug!(
            %base_url,
            default_headers = default_headers.len(),
            "created hub client"
        );

        Ok(Self {
            http,
            base_url,
            default_headers,
        })
    }

    /// The configured base URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn merge_headers(&self, overrides: &HeaderMap) -> HeaderMap {
        let mut merged = self.default_headers.clone();
        for name in overrides.keys() {
            merged.remove(name);
        }
        for (name, value) in overrides {
            merged.append(name, value.clone());
        }
        merged
    }

    /// Send a request to `{base_url}{path}` and decode the body as `T`.
    ///
    /// Returns `Ok(None)` for a successful response whose body is empty, is
    /// not declared as JSON, or does not decode as `T`. Some endpoints answer
    /// with empty bodies, so an undecodable body is not an error.
    pub async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Option<T>, HubClientError> {
        let url = self.build_url(path);
        let method = options.method.unwrap_or(Method::GET);
        let headers = self.merge_headers(&options.headers);
        debug!(%method, %url, "sending request");

        let response = self
            .http
            .request(method, &url)
            .headers(headers)
            .send()
            .await
            .map_err(HubClientError::Request)?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains(JSON_CONTENT_TYPE));

        if !status.is_success() {
            // The status alone classifies the failure; a body cut short is read as empty.
            let body = response.text().await.unwrap_or_else(|err| {
                debug!(%status, error = ?err, "failed to read error response body");
                String::new()
            });
            debug!(%status, is_json, body_len = body.len(), "received error response");
            let payload = if is_json {
                decode_body::<ApiErrorResponse>(path, &body).ok().flatten()
            } else {
                None
            };
            return Err(HubClientError::Response {
                status,
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                payload,
            });
        }

        let body = response.text().await.map_err(HubClientError::Request)?;
        debug!(%status, is_json, body_len = body.len(), "received response");

        if !is_json {
            if !body.is_empty() {
                debug!(path, "ignoring response body without a JSON content type");
            }
            return Ok(None);
        }

        match decode_body(path, &body) {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(error = ?err, "treating undecodable response body as empty");
                Ok(None)
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// The hub API operations.
///
/// This trait enables alternate implementations:
/// - **HTTP**: requests against the hub API via [`HubClient`]
/// - **Mock**: an in-memory catalog via [`MockClient`]
pub trait ClientTrait: Send + Sync {
    /// Liveness probe (`/healthz`).
    fn health(
        &self,
    ) -> impl Future<Output = Result<Option<HealthStatus>, HubClientError>> + Send;

    /// Readiness probe (`/readyz`).
    fn readiness(
        &self,
    ) -> impl Future<Output = Result<Option<HealthStatus>, HubClientError>> + Send;

    /// List catalog entries matching `params`.
    fn list_entries(
        &self,
        params: &ListParams,
    ) -> impl Future<Output = Result<EntryList, HubClientError>> + Send;

    /// Fetch a single entry by slug.
    ///
    /// An empty slug is rejected without a request. A missing entry is a
    /// 404 [HubClientError::Response], see [HubClientError::is_not_found].
    fn get_entry(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<Option<CatalogEntryDetail>, HubClientError>> + Send;

    /// List the tag vocabulary.
    fn list_tags(&self) -> impl Future<Output = Result<Vec<Tag>, HubClientError>> + Send;
}

impl ClientTrait for HubClient {
    #[instrument(skip_all)]
    async fn health(&self) -> Result<Option<HealthStatus>, HubClientError> {
        self.send("/healthz", RequestOptions::default()).await
    }

    #[instrument(skip_all)]
    async fn readiness(&self) -> Result<Option<HealthStatus>, HubClientError> {
        self.send("/readyz", RequestOptions::default()).await
    }

    #[instrument(skip_all, fields(query = %params.to_query_string()))]
    async fn list_entries(&self, params: &ListParams) -> Result<EntryList, HubClientError> {
        let path = format!("/projects{}", params.to_query_string());
        let list = retry_once("list_entries", || {
            self.send::<EntryList>(&path, RequestOptions::default())
        })
        .await?;

        let list = list.unwrap_or_default();
        debug!(
            n_items = list.items.len(),
            total = list.total,
            "received entries"
        );
        Ok(list)
    }

    #[instrument(skip(self))]
    async fn get_entry(&self, slug: &str) -> Result<Option<CatalogEntryDetail>, HubClientError> {
        validate_slug(slug)?;
        let path = entry_path(slug);
        retry_once("get_entry", || self.send(&path, RequestOptions::default())).await
    }

    #[instrument(skip_all)]
    async fn list_tags(&self) -> Result<Vec<Tag>, HubClientError> {
        let tags = self
            .send::<Vec<Tag>>("/tags", RequestOptions::default())
            .await?;
        Ok(tags.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Client selection
// ---------------------------------------------------------------------------

/// Either a real or an in-memory hub client.
#[derive(Debug, From)]
pub enum Client {
    Hub(HubClient),
    Mock(MockClient),
}

impl ClientTrait for Client {
    async fn health(&self) -> Result<Option<HealthStatus>, HubClientError> {
        match self {
            Client::Hub(client) => client.health().await,
            Client::Mock(client) => client.health().await,
        }
    }

    async fn readiness(&self) -> Result<Option<HealthStatus>, HubClientError> {
        match self {
            Client::Hub(client) => client.readiness().await,
            Client::Mock(client) => client.readiness().await,
        }
    }

    async fn list_entries(&self, params: &ListParams) -> Result<EntryList, HubClientError> {
        match self {
            Client::Hub(client) => client.list_entries(params).await,
            Client::Mock(client) => client.list_entries(params).await,
        }
    }

    async fn get_entry(&self, slug: &str) -> Result<Option<CatalogEntryDetail>, HubClientError> {
        match self {
            Client::Hub(client) => client.get_entry(slug).await,
            Client::Mock(client) => client.get_entry(slug).await,
        }
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, HubClientError> {
        match self {
            Client::Hub(client) => client.list_tags().await,
            Client::Mock(client) => client.list_tags().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Rejects slugs that cannot address an entry.
pub(crate) fn validate_slug(slug: &str) -> Result<(), HubClientError> {
    if slug.is_empty() {
        return Err(HubClientError::Validation("slug is required".to_string()));
    }
    Ok(())
}

/// Path of a single entry, with the slug encoded as one path component.
fn entry_path(slug: &str) -> String {
    format!("/projects/{}", url_escape::encode_component(slug))
}

/// Run `operation` and run it once more if it failed to reach the API.
async fn retry_once<T, F, Fut>(name: &str, operation: F) -> Result<T, HubClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, HubClientError>>,
{
    match operation().await {
        Err(err) if err.is_transport() => {
            debug!(operation = name, error = ?err, "retrying after transport failure");
            operation().await
        },
        result => result,
    }
}

fn decode_body<T: DeserializeOwned>(path: &str, body: &str) -> Result<Option<T>, HubClientError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|source| HubClientError::Decode {
            path: path.to_string(),
            source,
        })
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, HubClientError> {
    headers
        .iter()
        .map(|(key, value)| {
            let name = HeaderName::from_str(key).map_err(|e| {
                HubClientError::Configuration(format!("invalid header name '{key}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                HubClientError::Configuration(format!("invalid value for header '{key}': {e}"))
            })?;
            Ok((name, value))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// HTTP client builder
// ---------------------------------------------------------------------------

/// Build the HTTP client used for hub API requests.
fn build_http_client(config: &HubClientConfig) -> Result<reqwest::Client, HubClientError> {
    debug!(
        base_url = %config.base_url,
        has_user_agent = config.user_agent.is_some(),
        "building hub HTTP client"
    );

    let client_builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(60));

    let client_builder = if let Some(ref user_agent) = config.user_agent {
        client_builder.user_agent(user_agent)
    } else {
        client_builder
    };

    client_builder
        .build()
        .map_err(|e| HubClientError::Configuration(e.to_string()))
}
