//! Cached hub queries.
//!
//! [HubQueries] is the context object handed to consumers: it pairs a client
//! with the key scheme and the query caches, so every consumer of the same
//! handle shares cached results and in-flight requests.

use std::fmt::Debug;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, instrument};

use crate::cache::{QueryCache, QueryError, QueryResult};
use crate::client::{ClientTrait, validate_slug};
use crate::keys::{KeyFilter, KeyScheme};
use crate::types::{CatalogEntryDetail, EntryList, ListParams, Tag};

pub struct HubQueries<C> {
    client: Arc<C>,
    keys: KeyScheme,
    lists: QueryCache<Arc<EntryList>>,
    details: QueryCache<Option<Arc<CatalogEntryDetail>>>,
    tags: QueryCache<Arc<Vec<Tag>>>,
}

impl<C> Clone for HubQueries<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            keys: self.keys.clone(),
            lists: self.lists.clone(),
            details: self.details.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl<C> Debug for HubQueries<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubQueries")
            .field("namespace", &self.keys.namespace())
            .finish_non_exhaustive()
    }
}

impl<C> HubQueries<C>
where
    C: ClientTrait + 'static,
{
    pub fn new(client: C, keys: KeyScheme) -> Self {
        Self::with_shared_client(Arc::new(client), keys)
    }

    pub fn with_shared_client(client: Arc<C>, keys: KeyScheme) -> Self {
        Self {
            client,
            keys,
            lists: QueryCache::new(),
            details: QueryCache::new(),
            tags: QueryCache::new(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    /// A listing, served from cache for [crate::keys::ENTRIES_STALE_TIME].
    #[instrument(skip(self))]
    pub async fn entries(&self, params: &ListParams) -> QueryResult<Arc<EntryList>> {
        let key = self.keys.entry_list(params);
        let stale_time = key.stale_time();
        let client = Arc::clone(&self.client);
        let params = params.normalized();
        self.lists
            .fetch(key, stale_time, move || {
                async move { client.list_entries(&params).await.map(Arc::new) }.boxed()
            })
            .await
    }

    /// The last cached listing for `params`, fresh or not.
    pub fn cached_entries(&self, params: &ListParams) -> Option<Arc<EntryList>> {
        self.lists.get(&self.keys.entry_list(params))
    }

    /// A single entry, served from cache like listings.
    ///
    /// An empty slug fails validation and is never cached.
    #[instrument(skip(self))]
    pub async fn entry(&self, slug: &str) -> QueryResult<Option<Arc<CatalogEntryDetail>>> {
        validate_slug(slug).map_err(Arc::new)?;
        let key = self.keys.entry_detail(slug);
        let stale_time = key.stale_time();
        let client = Arc::clone(&self.client);
        let slug = slug.to_string();
        self.details
            .fetch(key, stale_time, move || {
                async move { Ok(client.get_entry(&slug).await?.map(Arc::new)) }.boxed()
            })
            .await
    }

    /// The tag vocabulary, served from cache for [crate::keys::TAGS_STALE_TIME].
    #[instrument(skip(self))]
    pub async fn tags(&self) -> QueryResult<Arc<Vec<Tag>>> {
        let key = self.keys.tags();
        let stale_time = key.stale_time();
        let client = Arc::clone(&self.client);
        self.tags
            .fetch(key, stale_time, move || {
                async move { client.list_tags().await.map(Arc::new) }.boxed()
            })
            .await
    }

    /// Mark matching results stale so the next query refetches them.
    pub fn invalidate(&self, filter: &KeyFilter) -> usize {
        let namespace = self.keys.namespace();
        self.lists.invalidate(namespace, filter)
            + self.details.invalidate(namespace, filter)
            + self.tags.invalidate(namespace, filter)
    }
}

// ---------------------------------------------------------------------------
// Listing observer
// ---------------------------------------------------------------------------

/// Identifies one request made through an [EntriesObserver].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// What a listing view shows.
#[derive(Debug, Clone, Default)]
pub struct ListingState {
    pub params: ListParams,
    pub data: Option<Arc<EntryList>>,
    /// `data` belongs to the previous parameters and is shown while the
    /// current ones load.
    pub is_placeholder: bool,
    pub is_fetching: bool,
    pub error: Option<QueryError>,
}

/// Keeps a listing on screen while its parameters change.
///
/// Switching parameters keeps the previous list as a placeholder until the
/// new list arrives or its request fails. Results of requests superseded by
/// a later [EntriesObserver::select] are ignored.
#[derive(Debug, Default)]
pub struct EntriesObserver {
    latest: u64,
    state: ListingState,
}

impl EntriesObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ListingState {
        &self.state
    }

    /// Switch to `params` and return the ticket of the request to issue.
    pub fn select<C>(&mut self, queries: &HubQueries<C>, params: &ListParams) -> Ticket
    where
        C: ClientTrait + 'static,
    {
        self.latest += 1;
        let params = params.normalized();

        match queries.cached_entries(&params) {
            Some(cached) => {
                self.state.data = Some(cached);
                self.state.is_placeholder = false;
            },
            None => {
                let changed = params != self.state.params;
                self.state.is_placeholder =
                    self.state.data.is_some() && (changed || self.state.is_placeholder);
            },
        }
        self.state.params = params;
        self.state.is_fetching = true;
        self.state.error = None;

        Ticket(self.latest)
    }

    /// Record the outcome of the request identified by `ticket`.
    ///
    /// Returns `false` if a later request superseded it.
    pub fn apply(&mut self, ticket: Ticket, result: QueryResult<Arc<EntryList>>) -> bool {
        if ticket.0 != self.latest {
            debug!(
                ticket = ticket.0,
                latest = self.latest,
                "ignoring superseded listing"
            );
            return false;
        }

        self.state.is_fetching = false;
        match result {
            Ok(data) => {
                self.state.data = Some(data);
                self.state.error = None;
            },
            Err(err) => {
                if self.state.is_placeholder {
                    self.state.data = None;
                }
                self.state.error = Some(err);
            },
        }
        self.state.is_placeholder = false;
        true
    }

    /// Select `params`, wait for the listing and apply it.
    pub async fn load<C>(&mut self, queries: &HubQueries<C>, params: &ListParams) -> &ListingState
    where
        C: ClientTrait + 'static,
    {
        let ticket = self.select(queries, params);
        let result = queries.entries(params).await;
        self.apply(ticket, result);
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::MockServer;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::client::HubClient;
    use crate::config::HubClientConfig;
    use crate::error::HubClientError;
    use crate::keys::TAGS_STALE_TIME;
    use crate::mock::MockClient;
    use crate::types::tests::{entry, tag};

    fn catalog() -> MockClient {
        MockClient::new(
            vec![
                entry("pi-hole-gateway", "Pi-hole Gateway", &["automation", "k3s"]),
                entry("media-server", "Media Server", &["media"]),
                entry("k3s-cluster", "K3s Cluster", &["k3s"]),
            ],
            vec![tag("automation"), tag("k3s"), tag("media")],
        )
        .with_latency(Duration::from_millis(50))
    }

    fn search(term: &str) -> ListParams {
        ListParams {
            search: Some(term.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn concurrent_listings_issue_one_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.path("/projects").query_param("search", "pi");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"items": [], "total": 0}))
                    .delay(Duration::from_millis(100));
            })
            .await;

        let client = HubClient::new(HubClientConfig::new(server.base_url())).unwrap();
        let queries = HubQueries::new(client, KeyScheme::default());

        let params = search("pi");
        let (first, second) = tokio::join!(queries.entries(&params), queries.entries(&params));

        assert_eq!(first.unwrap().total, 0);
        assert_eq!(second.unwrap().total, 0);
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_listings_share_one_mock_call() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());

        let params = search("pi");
        let equivalent = ListParams {
            tag: Some(String::new()),
            ..search("pi")
        };
        let (first, second) = tokio::join!(queries.entries(&params), queries.entries(&equivalent));

        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(queries.client().list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tags_are_fetched_once_per_window() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());

        let tags = queries.tags().await.unwrap();
        assert_eq!(tags.len(), 3);
        queries.tags().await.unwrap();
        assert_eq!(queries.client().tag_calls(), 1);

        tokio::time::advance(TAGS_STALE_TIME + Duration::from_secs(1)).await;
        queries.tags().await.unwrap();
        assert_eq!(queries.client().tag_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_by_slug_is_cached() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());

        let detail = queries.entry("media-server").await.unwrap().unwrap();
        assert_eq!(detail.title, "Media Server");
        queries.entry("media-server").await.unwrap();
        assert_eq!(queries.client().detail_calls(), 1);

        let err = queries.entry("missing").await.unwrap_err();
        assert!(err.is_not_found());

        let err = queries.entry("").await.unwrap_err();
        assert!(matches!(*err, HubClientError::Validation(_)));
        assert_eq!(queries.client().detail_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_forces_refetch() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());

        queries.entries(&ListParams::default()).await.unwrap();
        queries.tags().await.unwrap();
        assert_eq!(queries.invalidate(&KeyFilter::Entries), 1);

        queries.entries(&ListParams::default()).await.unwrap();
        queries.tags().await.unwrap();
        assert_eq!(queries.client().list_calls(), 2);
        assert_eq!(queries.client().tag_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_keeps_previous_listing_while_loading() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());
        let mut observer = EntriesObserver::new();

        let state = observer.load(&queries, &ListParams::default()).await;
        assert_eq!(state.data.as_ref().unwrap().total, 3);
        assert!(!state.is_placeholder);

        let ticket = observer.select(&queries, &search("media"));
        let state = observer.state();
        assert!(state.is_fetching);
        assert!(state.is_placeholder);
        assert_eq!(state.data.as_ref().unwrap().total, 3);

        let result = queries.entries(&search("media")).await;
        assert!(observer.apply(ticket, result));
        let state = observer.state();
        assert!(!state.is_placeholder);
        assert_eq!(state.data.as_ref().unwrap().total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_ignores_superseded_results() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());
        let mut observer = EntriesObserver::new();

        let stale_ticket = observer.select(&queries, &search("media"));
        let latest_ticket = observer.select(&queries, &search("k3s"));

        let latest = queries.entries(&search("k3s")).await;
        assert!(observer.apply(latest_ticket, latest));
        let stale = queries.entries(&search("media")).await;
        assert!(!observer.apply(stale_ticket, stale));

        let state = observer.state();
        assert_eq!(state.params, search("k3s"));
        assert_eq!(
            state
                .data
                .as_ref()
                .unwrap()
                .items
                .iter()
                .map(|item| item.slug.as_str())
                .collect::<Vec<_>>(),
            vec!["pi-hole-gateway", "k3s-cluster"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn observer_drops_placeholder_on_failure() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());
        let mut observer = EntriesObserver::new();

        observer.load(&queries, &ListParams::default()).await;
        queries.client().fail_next(StatusCode::SERVICE_UNAVAILABLE);

        let state = observer.load(&queries, &search("pi")).await;
        assert!(state.data.is_none());
        assert!(!state.is_placeholder);
        assert_eq!(
            state.error.as_ref().and_then(|err| err.status()),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn observer_uses_cached_listing_immediately() {
        let queries = HubQueries::new(catalog(), KeyScheme::default());
        let mut observer = EntriesObserver::new();

        observer.load(&queries, &search("media")).await;
        observer.load(&queries, &ListParams::default()).await;

        observer.select(&queries, &search("media"));
        let state = observer.state();
        assert!(!state.is_placeholder);
        assert_eq!(state.data.as_ref().unwrap().total, 1);
    }
}
