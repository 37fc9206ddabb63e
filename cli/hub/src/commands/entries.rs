use std::fmt::Write;

use anyhow::{Context, Result, bail};
use bpaf::Bpaf;
use hub_catalog::filters::{self, FilterState};
use hub_catalog::types::{CatalogEntryDetail, EntryList};
use hub_catalog::{ClientTrait, HubQueries, ListParams};
use itertools::Itertools;
use tracing::{debug, instrument};

use crate::utils::message;

/// List catalog entries
#[derive(Debug, Clone, Bpaf)]
pub struct Entries {
    /// Only list entries carrying this tag
    #[bpaf(long, argument("TAG"))]
    pub tag: Option<String>,

    /// Only list entries in this category
    #[bpaf(long, argument("CATEGORY"))]
    pub category: Option<String>,

    /// Only list entries whose title, summary or tags contain this term
    #[bpaf(long, short, argument("TERM"))]
    pub search: Option<String>,

    /// Maximum number of entries to list
    #[bpaf(long, argument("N"))]
    pub limit: Option<u32>,

    /// Number of entries to skip
    #[bpaf(long, argument("N"))]
    pub offset: Option<u32>,

    /// Read filters from a page query, e.g. 'search=pi&tag=k3s'
    ///
    /// Filters given as options take precedence.
    #[bpaf(long, argument("QUERY"))]
    pub query: Option<String>,

    /// Print the listing as JSON
    #[bpaf(long)]
    pub json: bool,
}

impl Entries {
    /// The filters of this invocation, options over `--query`.
    fn filters(&self) -> FilterState {
        let from_query = self
            .query
            .as_deref()
            .map(filters::decode)
            .unwrap_or_default();

        filters::normalize(&FilterState {
            search: self.search.clone().or(from_query.search),
            tag: self.tag.clone().or(from_query.tag),
            category: self.category.clone().or(from_query.category),
        })
    }

    fn list_params(&self) -> ListParams {
        ListParams {
            limit: self.limit,
            offset: self.offset,
            ..ListParams::from(&self.filters())
        }
    }

    #[instrument(name = "entries", skip_all, fields(json = self.json))]
    pub async fn handle<C: ClientTrait + 'static>(self, queries: &HubQueries<C>) -> Result<()> {
        let params = self.list_params();
        debug!(query = %params.to_query_string(), "listing entries");

        let list = queries
            .entries(&params)
            .await
            .context("failed to list catalog entries")?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&*list)?);
            return Ok(());
        }

        if list.items.is_empty() {
            message::plain("No entries match the given filters.");
            return Ok(());
        }

        print!("{}", render_entries(&list, &filters::encode(&self.filters())));
        Ok(())
    }
}

/// Show a single catalog entry
#[derive(Debug, Clone, Bpaf)]
pub struct Entry {
    /// Print the entry as JSON
    #[bpaf(long)]
    pub json: bool,

    /// Slug of the entry, e.g. 'pi-hole-gateway'
    #[bpaf(positional("SLUG"))]
    pub slug: String,
}

impl Entry {
    #[instrument(name = "entry", skip_all, fields(slug = self.slug, json = self.json))]
    pub async fn handle<C: ClientTrait + 'static>(self, queries: &HubQueries<C>) -> Result<()> {
        let entry = match queries.entry(&self.slug).await {
            Ok(Some(entry)) => entry,
            Ok(None) => bail!("the hub returned no content for entry '{}'", self.slug),
            Err(err) if err.is_not_found() => bail!("no entry named '{}'", self.slug),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to fetch entry '{}'", self.slug));
            },
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&*entry)?);
            return Ok(());
        }

        print!("{}", render_entry(&entry));
        Ok(())
    }
}

fn render_entries(list: &EntryList, query: &str) -> String {
    let width = list
        .items
        .iter()
        .map(|item| item.slug.len())
        .max()
        .unwrap_or_default();

    let mut out = String::new();
    for item in &list.items {
        let tags = item.tags.iter().map(|tag| &tag.name).join(", ");
        let _ = write!(out, "{:width$}  {}", item.slug, item.title);
        if !tags.is_empty() {
            let _ = write!(out, " [{tags}]");
        }
        out.push('\n');
    }

    let _ = write!(out, "\nShowing {} of {} entries", list.items.len(), list.total);
    if !query.is_empty() {
        let _ = write!(out, " for '{query}'");
    }
    out.push('\n');
    out
}

fn render_entry(entry: &CatalogEntryDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", entry.title, entry.slug);
    let _ = writeln!(out, "status:   {}", entry.status);
    if let Some(category) = &entry.category {
        let _ = writeln!(out, "category: {}", category.name);
    }
    if !entry.tags.is_empty() {
        let tags = entry.tags.iter().map(|tag| &tag.display_name).join(", ");
        let _ = writeln!(out, "tags:     {tags}");
    }
    if let Some(summary) = &entry.summary {
        let _ = write!(out, "\n{summary}\n");
    }
    if let Some(description) = &entry.description {
        let _ = write!(out, "\n{}\n", description.trim_end());
    }
    if !entry.links.is_empty() {
        out.push_str("\nlinks:\n");
        for link in &entry.links {
            let label = link.label.as_deref().unwrap_or(&link.link_type);
            let _ = writeln!(out, "  {label}: {}", link.url);
        }
    }
    out
}
