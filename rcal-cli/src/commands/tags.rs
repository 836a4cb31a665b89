//! Tags command implementation for the rcal CLI.
//!
//! Lists every tag binding in the store. Each tag points at exactly one
//! image; an image may carry any number of tags.

use anyhow::{Context, Result};
use colored::Colorize;
use rcal_core::Config;
use tabled::{Table, Tabled};

use super::images::{format_created, format_image_id};

/// Lists all tag bindings.
pub async fn tags(config: &Config) -> Result<()> {
    let store = super::open_store(config).await?;
    let bindings = store.list_tags().await.with_context(|| "Failed to list tags")?;

    if bindings.is_empty() {
        println!("No tags found.");
        println!();
        println!("Tags are applied by: {}", "rcal build".cyan());
        return Ok(());
    }

    #[derive(Tabled)]
    struct TagRow {
        #[tabled(rename = "TAG")]
        tag: String,
        #[tabled(rename = "IMAGE ID")]
        image_id: String,
        #[tabled(rename = "APPLIED")]
        applied: String,
    }

    let rows: Vec<TagRow> = bindings
        .iter()
        .map(|binding| TagRow {
            tag: binding.tag.clone(),
            image_id: format_image_id(&binding.image_id),
            applied: format_created(binding.applied_at),
        })
        .collect();

    let table = Table::new(rows).to_string();
    println!("{}", table);

    Ok(())
}
