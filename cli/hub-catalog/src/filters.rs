//! Listing filters persisted in a URL query.
//!
//! Only `search`, `tag` and `category` live in the query; pagination never
//! does. Unrecognized query fields are ignored when reading and dropped when
//! writing, since the query is always rewritten from scratch.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use url::form_urlencoded;

use crate::types::ListParams;

/// Query fields holding filters, in the order they are written.
pub const FILTER_KEYS: [&str; 3] = ["search", "tag", "category"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl FilterState {
    fn field(&self, key: &str) -> Option<&String> {
        match key {
            "search" => self.search.as_ref(),
            "tag" => self.tag.as_ref(),
            "category" => self.category.as_ref(),
            _ => None,
        }
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "search" => Some(&mut self.search),
            "tag" => Some(&mut self.tag),
            "category" => Some(&mut self.category),
            _ => None,
        }
    }
}

impl From<&FilterState> for ListParams {
    fn from(filters: &FilterState) -> Self {
        ListParams {
            tag: filters.tag.clone(),
            category: filters.category.clone(),
            search: filters.search.clone(),
            ..Default::default()
        }
    }
}

/// Trim every field and drop the ones left empty.
pub fn normalize(filters: &FilterState) -> FilterState {
    fn trimmed(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
    }

    FilterState {
        search: trimmed(&filters.search),
        tag: trimmed(&filters.tag),
        category: trimmed(&filters.category),
    }
}

/// Read the filters from a query string, with or without its leading `?`.
///
/// A repeated field takes its first value; an empty value leaves the field
/// unset.
pub fn decode(query: &str) -> FilterState {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut filters = FilterState::default();
    let mut seen = Vec::with_capacity(FILTER_KEYS.len());

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if seen.contains(&key) {
            continue;
        }
        let Some(field) = filters.field_mut(&key) else {
            continue;
        };
        if !value.is_empty() {
            *field = Some(value.into_owned());
        }
        seen.push(key);
    }
    filters
}

/// Write the normalized filters as a query string without a leading `?`.
pub fn encode(filters: &FilterState) -> String {
    let filters = normalize(filters);
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for key in FILTER_KEYS {
        if let Some(value) = filters.field(key) {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Where the filters are displayed.
pub trait Navigator {
    /// The current query, without its leading `?`.
    fn query(&self) -> String;

    /// Replace the current query without adding a history entry.
    fn replace_query(&mut self, query: &str);
}

/// A [Navigator] over an in-memory URL.
#[derive(Debug, Clone)]
pub struct MemoryNavigator {
    url: Url,
    replacements: usize,
}

impl MemoryNavigator {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            replacements: 0,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// How many times the query was replaced.
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl Navigator for MemoryNavigator {
    fn query(&self) -> String {
        self.url.query().unwrap_or_default().to_string()
    }

    fn replace_query(&mut self, query: &str) {
        self.url.set_query((!query.is_empty()).then_some(query));
        self.replacements += 1;
    }
}

/// Keeps listing filters in sync with a [Navigator].
#[derive(Debug)]
pub struct FilterSync<N> {
    navigator: N,
}

impl<N: Navigator> FilterSync<N> {
    pub fn new(navigator: N) -> Self {
        Self { navigator }
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    /// The filters currently in the query.
    pub fn filters(&self) -> FilterState {
        decode(&self.navigator.query())
    }

    /// The listing parameters for the current filters.
    pub fn list_params(&self) -> ListParams {
        ListParams::from(&self.filters()).normalized()
    }

    /// Normalize `next` and write it as the whole query.
    ///
    /// Fields absent from `next` are removed from the query. Returns whether
    /// the filters changed.
    pub fn set_filters(&mut self, next: &FilterState) -> bool {
        let next = normalize(next);
        let changed = normalize(&self.filters()) != next;
        let query = encode(&next);
        debug!(%query, changed, "replacing filter query");
        self.navigator.replace_query(&query);
        changed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn filters(search: Option<&str>, tag: Option<&str>, category: Option<&str>) -> FilterState {
        FilterState {
            search: search.map(String::from),
            tag: tag.map(String::from),
            category: category.map(String::from),
        }
    }

    fn navigator(query: &str) -> MemoryNavigator {
        let mut url = Url::parse("https://hub.example/projects").unwrap();
        url.set_query(Some(query));
        MemoryNavigator::new(url)
    }

    #[test]
    fn decode_reads_recognized_fields() {
        assert_eq!(
            decode("?search=pi+hole&tag=k3s&page=2&category=networking"),
            filters(Some("pi hole"), Some("k3s"), Some("networking"))
        );
        assert_eq!(decode(""), FilterState::default());
        assert_eq!(decode("tag="), FilterState::default());
    }

    #[test]
    fn decode_takes_first_occurrence() {
        assert_eq!(decode("tag=k3s&tag=media"), filters(None, Some("k3s"), None));
        assert_eq!(decode("tag=&tag=media"), FilterState::default());
    }

    #[test]
    fn encode_uses_fixed_order() {
        assert_eq!(
            encode(&filters(Some("pi"), Some("k3s"), Some("networking"))),
            "search=pi&tag=k3s&category=networking"
        );
        assert_eq!(
            encode(&filters(Some("  "), None, Some("a&b"))),
            "category=a%26b"
        );
    }

    #[test]
    fn search_is_trimmed_before_it_is_written() {
        let mut sync = FilterSync::new(navigator(""));
        assert!(sync.set_filters(&filters(Some("  pi  "), None, None)));

        assert_eq!(sync.navigator().query(), "search=pi");
        assert_eq!(sync.filters(), filters(Some("pi"), None, None));
        assert_eq!(sync.list_params(), ListParams {
            search: Some("pi".to_string()),
            ..Default::default()
        });
    }

    #[test]
    fn cleared_filters_leave_no_residue() {
        let mut sync = FilterSync::new(navigator("tag=k3s&utm_source=feed"));
        assert_eq!(sync.filters(), filters(None, Some("k3s"), None));

        assert!(sync.set_filters(&FilterState::default()));
        assert_eq!(sync.navigator().url().query(), None);
        assert_eq!(sync.navigator().url().path(), "/projects");
        assert_eq!(sync.filters(), FilterState::default());
    }

    #[test]
    fn unchanged_filters_still_rewrite_the_query() {
        let mut sync = FilterSync::new(navigator("category=networking&tag=k3s"));
        assert!(!sync.set_filters(&filters(None, Some("k3s "), Some("networking"))));
        assert_eq!(sync.navigator().query(), "tag=k3s&category=networking");
        assert_eq!(sync.navigator().replacements(), 1);
    }

    #[test]
    fn pagination_never_reaches_the_query() {
        let sync = FilterSync::new(navigator("limit=10&offset=20&search=pi"));
        let params = sync.list_params();
        assert_eq!(params.limit, None);
        assert_eq!(params.offset, None);
        assert_eq!(params.search.as_deref(), Some("pi"));
    }

    proptest! {
        #[test]
        fn encoded_filters_decode_to_their_normal_form(
            search in proptest::option::of("[ a-zA-Z0-9&=?+%#]{0,10}"),
            tag in proptest::option::of("[ a-z0-9-]{0,8}"),
            category in proptest::option::of("[ a-z0-9/]{0,8}"),
        ) {
            let state = FilterState { search, tag, category };
            let normalized = normalize(&state);
            prop_assert_eq!(decode(&encode(&normalized)), normalized.clone());
            prop_assert_eq!(normalize(&normalized), normalized);
        }
    }
}
