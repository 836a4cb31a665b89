//! Images command implementation for the rcal CLI.
//!
//! Lists every image registered in the store.

use anyhow::{Context, Result};
use colored::Colorize;
use rcal_core::Config;
use tabled::{Table, Tabled};

/// Lists all registered images.
pub async fn images(config: &Config) -> Result<()> {
    let store = super::open_store(config).await?;
    let images = store.list_images().await.with_context(|| "Failed to list images")?;

    if images.is_empty() {
        println!("No images found.");
        println!();
        println!("Build your first image with: {}", "rcal build".cyan());
        return Ok(());
    }

    #[derive(Tabled)]
    struct ImageRow {
        #[tabled(rename = "REPOSITORY")]
        repository: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "IMAGE ID")]
        image_id: String,
        #[tabled(rename = "TAGS")]
        tags: String,
        #[tabled(rename = "SIZE")]
        size: String,
        #[tabled(rename = "CREATED")]
        created: String,
    }

    let mut rows = Vec::new();
    for img in &images {
        let tags = store
            .tags_for_image(&img.id)
            .await
            .with_context(|| "Failed to list tags for image")?;
        rows.push(ImageRow {
            repository: img.manifest.name.clone(),
            version: img.manifest.image_version.clone(),
            image_id: format_image_id(&img.id),
            tags: tags.len().to_string(),
            size: format_size(img.size_bytes),
            created: format_created(img.created_at),
        });
    }

    let table = Table::new(rows).to_string();
    println!("{}", table);

    Ok(())
}

/// Formats an image ID to short form (first 12 characters).
pub(crate) fn format_image_id(id: &str) -> String {
    if let Some(digest) = id.strip_prefix("sha256:") {
        digest.chars().take(12).collect()
    } else {
        id.chars().take(12).collect()
    }
}

/// Formats size in bytes to human-readable form.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Formats creation time relative to now.
pub(crate) fn format_created(created_at: std::time::SystemTime) -> String {
    use std::time::SystemTime;

    let elapsed = SystemTime::now().duration_since(created_at).unwrap_or_default();

    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else if secs < 604800 {
        format!("{} days ago", secs / 86400)
    } else {
        format!("{} weeks ago", secs / 604800)
    }
}
