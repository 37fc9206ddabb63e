//! Cache keys for hub queries.
//!
//! A key is the tuple `(namespace, resource, operation, params)`:
//!
//! | Query | Key |
//! |---|---|
//! | entry listing | `[namespace, "entries", "list", params]` |
//! | single entry | `[namespace, "entries", "detail", slug]` |
//! | tag vocabulary | `[namespace, "tags"]` |
//!
//! Listing parameters are normalized before they become part of a key, so
//! `{search: ""}` and `{}` address the same cached result.

use std::fmt::Display;
use std::time::Duration;

use serde_json::json;

use crate::config::DEFAULT_NAMESPACE;
use crate::types::ListParams;

/// How long a listing or a single entry is served from cache.
pub const ENTRIES_STALE_TIME: Duration = Duration::from_secs(60);

/// How long the tag vocabulary is served from cache.
/// Tags change far less often than the catalog itself.
pub const TAGS_STALE_TIME: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    EntryList(ListParams),
    EntryDetail(String),
    Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    resource: Resource,
}

impl CacheKey {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Freshness window of results stored under this key.
    pub fn stale_time(&self) -> Duration {
        match self.resource {
            Resource::EntryList(_) | Resource::EntryDetail(_) => ENTRIES_STALE_TIME,
            Resource::Tags => TAGS_STALE_TIME,
        }
    }

    /// The key as its tuple of segments.
    pub fn segments(&self) -> serde_json::Value {
        match &self.resource {
            Resource::EntryList(params) => json!([self.namespace, "entries", "list", params]),
            Resource::EntryDetail(slug) => json!([self.namespace, "entries", "detail", slug]),
            Resource::Tags => json!([self.namespace, "tags"]),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments())
    }
}

/// Derives the keys of one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    namespace: String,
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyScheme {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entry_list(&self, params: &ListParams) -> CacheKey {
        self.key(Resource::EntryList(params.normalized()))
    }

    pub fn entry_detail(&self, slug: impl Into<String>) -> CacheKey {
        self.key(Resource::EntryDetail(slug.into()))
    }

    pub fn tags(&self) -> CacheKey {
        self.key(Resource::Tags)
    }

    fn key(&self, resource: Resource) -> CacheKey {
        CacheKey {
            namespace: self.namespace.clone(),
            resource,
        }
    }
}

/// Selects keys of one namespace by prefix, for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    /// `[namespace]`
    All,
    /// `[namespace, "entries"]`
    Entries,
    /// `[namespace, "entries", "list"]`
    EntryLists,
    /// `[namespace, "entries", "list", params]` after normalization.
    EntryList(ListParams),
    /// `[namespace, "entries", "detail", slug]`
    EntryDetail(String),
    /// `[namespace, "tags"]`
    Tags,
}

impl KeyFilter {
    pub fn matches(&self, namespace: &str, key: &CacheKey) -> bool {
        if key.namespace != namespace {
            return false;
        }
        match (self, &key.resource) {
            (KeyFilter::All, _) => true,
            (KeyFilter::Entries, Resource::EntryList(_) | Resource::EntryDetail(_)) => true,
            (KeyFilter::EntryLists, Resource::EntryList(_)) => true,
            (KeyFilter::EntryList(params), Resource::EntryList(key_params)) => {
                &params.normalized() == key_params
            },
            (KeyFilter::EntryDetail(slug), Resource::EntryDetail(key_slug)) => slug == key_slug,
            (KeyFilter::Tags, Resource::Tags) => true,
            _ => false,
        }
    }
}
