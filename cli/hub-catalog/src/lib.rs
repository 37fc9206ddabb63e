//! Client for the hub catalog API.
//!
//! This crate provides:
//! - An HTTP transport with header merging and failure classification
//! - Typed operations for health probes, entries and tags
//! - A query cache with freshness windows and in-flight de-duplication
//! - Synchronization of listing filters with a URL query
//! - An in-memory mock client for tests and offline use
//!
//! ## Usage
//!
//! ```ignore
//! use hub_catalog::{HubClient, HubClientConfig, HubQueries, KeyScheme, ListParams};
//!
//! let client = HubClient::new(HubClientConfig::new("https://hub.example"))?;
//! let queries = HubQueries::new(client, KeyScheme::default());
//!
//! let listing = queries
//!     .entries(&ListParams {
//!         tag: Some("k3s".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

mod cache;
mod client;
mod config;
mod error;
pub mod filters;
mod keys;
mod mock;
mod queries;
pub mod types;

// Public exports
pub use cache::{GC_TIME, QueryCache, QueryError, QueryResult};
pub use client::{Client, ClientTrait, HubClient, RequestOptions};
pub use config::{DEFAULT_BASE_URL, DEFAULT_NAMESPACE, HubClientConfig};
pub use error::{ApiErrorResponse, ErrorKind, HubClientError};
pub use filters::{FilterState, FilterSync, MemoryNavigator, Navigator};
pub use keys::{CacheKey, ENTRIES_STALE_TIME, KeyFilter, KeyScheme, Resource, TAGS_STALE_TIME};
pub use mock::MockClient;
pub use queries::{EntriesObserver, HubQueries, ListingState, Ticket};
pub use types::{CatalogEntryDetail, CatalogEntrySummary, EntryList, HealthStatus, ListParams, Tag};
