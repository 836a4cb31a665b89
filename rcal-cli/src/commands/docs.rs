//! Docs command implementation for the rcal CLI.
//!
//! Standalone documentation generation. Unlike `build --with-docs`,
//! a failure here fails the command.

use anyhow::{Context, Result};
use colored::Colorize;
use rcal_core::{Config, DocsGenerator};

/// Generates the API documentation site.
pub fn docs(config: &Config) -> Result<()> {
    let generator = DocsGenerator::new(config);
    let api_doc =
        generator.generate().with_context(|| "Documentation generation failed")?;

    println!("{}", "Documentation generated.".green().bold());
    println!("  API docs: {}", api_doc.display().to_string().yellow());
    Ok(())
}
