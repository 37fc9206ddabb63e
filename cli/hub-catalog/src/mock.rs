//! An in-memory hub for tests and offline use.
//!
//! [MockClient] answers the [ClientTrait] operations from a fixed catalog,
//! filtering listings the way the hub does. Failures can be queued to
//! exercise error paths.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::client::{ClientTrait, validate_slug};
use crate::error::{ApiErrorResponse, HubClientError};
use crate::types::{CatalogEntryDetail, EntryList, HealthStatus, ListParams, Tag};

/// Contents of a mock data file.
#[derive(Debug, Default, Deserialize)]
struct MockData {
    #[serde(default, alias = "projects")]
    entries: Vec<CatalogEntryDetail>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Default)]
struct CallCounts {
    health: AtomicUsize,
    list: AtomicUsize,
    detail: AtomicUsize,
    tags: AtomicUsize,
}

/// A hub client serving a fixed catalog.
#[derive(Debug, Default)]
pub struct MockClient {
    entries: Vec<CatalogEntryDetail>,
    tags: Vec<Tag>,
    latency: Option<Duration>,
    failures: Mutex<VecDeque<StatusCode>>,
    calls: CallCounts,
}

impl MockClient {
    pub fn new(entries: Vec<CatalogEntryDetail>, tags: Vec<Tag>) -> Self {
        Self {
            entries,
            tags,
            ..Default::default()
        }
    }

    /// Load a catalog from a JSON file of the form
    /// `{"projects": [CatalogEntryDetail], "tags": [Tag]}`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HubClientError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HubClientError::Configuration(format!(
                "couldn't read mock data '{}': {e}",
                path.display()
            ))
        })?;
        let data: MockData = serde_json::from_str(&contents).map_err(|e| {
            HubClientError::Configuration(format!(
                "invalid mock data '{}': {e}",
                path.display()
            ))
        })?;
        debug!(
            path = %path.display(),
            n_entries = data.entries.len(),
            n_tags = data.tags.len(),
            "loaded mock data"
        );
        Ok(Self::new(data.entries, data.tags))
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next operation with a `status` response.
    pub fn fail_next(&self, status: StatusCode) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(status);
    }

    pub fn health_calls(&self) -> usize {
        self.calls.health.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.calls.list.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.calls.detail.load(Ordering::SeqCst)
    }

    pub fn tag_calls(&self) -> usize {
        self.calls.tags.load(Ordering::SeqCst)
    }

    /// Count the call, wait out the latency and pop a queued failure.
    async fn respond(&self, counter: &AtomicUsize) -> Result<(), HubClientError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match failure {
            Some(status) => Err(error_response(status, None)),
            None => Ok(()),
        }
    }

    fn filter(&self, params: &ListParams) -> Vec<&CatalogEntryDetail> {
        let params = params.normalized();
        let term = params.search.as_deref().map(str::to_lowercase);

        self.entries
            .iter()
            .filter(|entry| {
                params
                    .tag
                    .as_ref()
                    .is_none_or(|name| entry.tags.iter().any(|tag| &tag.name == name))
            })
            .filter(|entry| {
                params.category.as_ref().is_none_or(|slug| {
                    entry
                        .category
                        .as_ref()
                        .is_some_and(|category| &category.slug == slug)
                })
            })
            .filter(|entry| {
                term.as_ref().is_none_or(|term| {
                    entry.title.to_lowercase().contains(term)
                        || entry
                            .summary
                            .as_ref()
                            .is_some_and(|summary| summary.to_lowercase().contains(term))
                        || entry
                            .tags
                            .iter()
                            .any(|tag| tag.display_name.to_lowercase().contains(term))
                })
            })
            .collect()
    }

    fn probe(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl ClientTrait for MockClient {
    async fn health(&self) -> Result<Option<HealthStatus>, HubClientError> {
        self.respond(&self.calls.health).await?;
        Ok(Some(self.probe()))
    }

    async fn readiness(&self) -> Result<Option<HealthStatus>, HubClientError> {
        self.respond(&self.calls.health).await?;
        Ok(Some(self.probe()))
    }

    async fn list_entries(&self, params: &ListParams) -> Result<EntryList, HubClientError> {
        self.respond(&self.calls.list).await?;

        let filtered = self.filter(params);
        let total = filtered.len() as u64;
        let items = filtered
            .into_iter()
            .skip(params.offset.unwrap_or(0) as usize)
            .take(params.limit.map_or(usize::MAX, |limit| limit as usize))
            .map(|entry| entry.as_summary().clone())
            .collect();
        Ok(EntryList { items, total })
    }

    async fn get_entry(&self, slug: &str) -> Result<Option<CatalogEntryDetail>, HubClientError> {
        validate_slug(slug)?;
        self.respond(&self.calls.detail).await?;

        match self.entries.iter().find(|entry| entry.slug == slug) {
            Some(entry) => Ok(Some(entry.clone())),
            None => Err(error_response(
                StatusCode::NOT_FOUND,
                Some(ApiErrorResponse {
                    error: "Project not found".to_string(),
                    detail: None,
                    correlation_id: None,
                }),
            )),
        }
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, HubClientError> {
        self.respond(&self.calls.tags).await?;
        Ok(self.tags.clone())
    }
}

fn error_response(status: StatusCode, payload: Option<ApiErrorResponse>) -> HubClientError {
    HubClientError::Response {
        status,
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        payload,
    }
}
