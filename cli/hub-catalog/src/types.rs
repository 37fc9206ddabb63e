//! Catalog types as served by the hub API.
//!
//! All records are immutable snapshots of what the service returned.
//! Field names follow the camelCase JSON of the wire format; unknown fields
//! are ignored.

use derive_more::Deref;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// Lifecycle state of a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Active,
    Archived,
    Deprecated,
    /// A status this client does not know about yet.
    #[serde(untagged)]
    Unknown(String),
}

impl EntryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Active => "active",
            EntryStatus::Archived => "archived",
            EntryStatus::Deprecated => "deprecated",
            EntryStatus::Unknown(status) => status,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    /// Machine name, used as the `tag` filter token.
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    /// Used as the `category` filter token.
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

// ---------------------------------------------------------------------------
// Media and links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Pending,
    Available,
    Errored,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// URL or storage path of the asset.
    pub storage_path: String,
    pub original_filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: MediaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryLink {
    pub id: String,
    /// Kind of link, e.g. `docs` or `repo`.
    pub link_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ---------------------------------------------------------------------------
// Catalog entries
// ---------------------------------------------------------------------------

/// A catalog entry as it appears in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntrySummary {
    pub id: String,
    /// Unique and URL-safe.
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_media: Option<MediaAsset>,
}

/// A single catalog entry with its long-form content.
///
/// Dereferences to the [CatalogEntrySummary] it extends, which is flattened
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Deref)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntryDetail {
    #[deref]
    #[serde(flatten)]
    pub entry: CatalogEntrySummary,
    /// Markdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub links: Vec<EntryLink>,
    #[serde(default)]
    pub media: Vec<MediaAsset>,
}

impl CatalogEntryDetail {
    /// The listing projection of this entry.
    pub fn as_summary(&self) -> &CatalogEntrySummary {
        &self.entry
    }

    pub fn into_summary(self) -> CatalogEntrySummary {
        self.entry
    }
}

/// One page of a listing. `total` counts the filtered entries, not the
/// whole catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryList {
    pub items: Vec<CatalogEntrySummary>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Listing parameters
// ---------------------------------------------------------------------------

/// Parameters of a listing. Every field is optional; an absent field leaves
/// the listing unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl ListParams {
    /// Drops empty-string fields so that equivalent parameter sets compare
    /// and hash equal.
    pub fn normalized(&self) -> Self {
        fn non_empty(value: &Option<String>) -> Option<String> {
            value.as_ref().filter(|value| !value.is_empty()).cloned()
        }

        Self {
            tag: non_empty(&self.tag),
            category: non_empty(&self.category),
            search: non_empty(&self.search),
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Surviving parameters in the fixed order `tag, category, search,
    /// limit, offset`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let normalized = self.normalized();
        [
            ("tag", normalized.tag),
            ("category", normalized.category),
            ("search", normalized.search),
            ("limit", normalized.limit.map(|limit| limit.to_string())),
            ("offset", normalized.offset.map(|offset| offset.to_string())),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect()
    }

    /// The form-encoded query, including the leading `?`, or an empty string
    /// when no parameter survives.
    pub fn to_query_string(&self) -> String {
        let pairs = self.query_pairs();
        if pairs.is_empty() {
            return String::new();
        }
        let serialized = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("?{serialized}")
    }
}
