use std::fmt::Write;

use anyhow::{Context, Result};
use bpaf::Bpaf;
use hub_catalog::types::Tag;
use hub_catalog::{ClientTrait, HubQueries};
use tracing::instrument;

use crate::utils::message;

/// List the tag vocabulary
#[derive(Debug, Clone, Bpaf)]
pub struct Tags {
    /// Print the tags as JSON
    #[bpaf(long)]
    pub json: bool,
}

impl Tags {
    #[instrument(name = "tags", skip_all, fields(json = self.json))]
    pub async fn handle<C: ClientTrait + 'static>(self, queries: &HubQueries<C>) -> Result<()> {
        let tags = queries.tags().await.context("failed to list tags")?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&*tags)?);
            return Ok(());
        }

        if tags.is_empty() {
            message::plain("The hub has no tags yet.");
            return Ok(());
        }

        print!("{}", render_tags(&tags));
        Ok(())
    }
}

/// One tag per line: the filter token, then its display name.
fn render_tags(tags: &[Tag]) -> String {
    let width = tags
        .iter()
        .map(|tag| tag.name.len())
        .max()
        .unwrap_or_default();

    tags.iter().fold(String::new(), |mut out, tag| {
        let _ = writeln!(out, "{:width$}  {}", tag.name, tag.display_name);
        out
    })
}
