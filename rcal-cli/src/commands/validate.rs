//! Validate command implementation for the rcal CLI.
//!
//! Checks the release configuration without building anything: the
//! image spec, the derived tag set, and the provisioning sequence.

use anyhow::Result;
use colored::Colorize;
use rcal_core::provision::ProvisioningSequence;
use rcal_core::Config;

/// Validates the release configuration and prints what a build would do.
pub fn validate(config: &Config) -> Result<()> {
    let spec = config.image_spec();
    spec.validate()?;
    println!("{} Image spec: {} {}", "✓".green(), spec.base_name.green(), spec.version.cyan());

    let tag_set = spec.tag_set();
    println!("{} Tag set ({} tags):", "✓".green(), tag_set.len());
    for tag in &tag_set {
        println!("    {}", tag);
    }

    let sequence = ProvisioningSequence::from_config(config);
    sequence.validate()?;
    println!("{} Provisioning sequence ({} steps):", "✓".green(), sequence.len());
    for step in sequence.steps() {
        println!("    {}", step);
    }

    println!();
    println!("{}", "Configuration is valid.".green().bold());
    Ok(())
}
