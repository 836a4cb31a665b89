//! Build command implementation for the rcal CLI.
//!
//! Runs the full release pipeline with progress output: provision the
//! image, register it, apply the tag set, optionally generate docs.

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rcal_core::provision::{ProvisioningSequence, StepRunner, SystemRunner};
use rcal_core::{build_image, Config, DocsGenerator};
use tracing::warn;

/// A runner that advances a progress bar around the real one.
struct ProgressRunner<'a> {
    inner: &'a mut dyn StepRunner,
    bar: &'a ProgressBar,
}

impl StepRunner for ProgressRunner<'_> {
    fn run(
        &mut self,
        step: &rcal_core::provision::ProvisioningStep,
        state: &rcal_core::provision::ProvisionState,
    ) -> std::result::Result<(), String> {
        self.bar.set_message(step.to_string());
        let result = self.inner.run(step, state);
        // Advance only on success: a failed step is not a completed one.
        if result.is_ok() {
            self.bar.inc(1);
        }
        result
    }
}

/// Builds the release image and applies every configured tag.
pub async fn build(config: &Config, with_docs: bool) -> Result<()> {
    let spec = config.image_spec();
    println!(
        "{} Building image {} {}",
        "[1/3]".bold().blue(),
        spec.base_name.green(),
        spec.version.cyan()
    );

    let sequence = ProvisioningSequence::from_config(config);
    println!("  {} provisioning steps", sequence.len().to_string().yellow());

    println!("{} Provisioning and registering", "[2/3]".bold().blue());

    let store = super::open_store(config).await?;

    let pb = ProgressBar::new(sequence.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| anyhow::anyhow!("Invalid progress template: {}", e))?
            .progress_chars("=>-"),
    );

    let mut system = SystemRunner::new(config);
    let mut runner = ProgressRunner { inner: &mut system, bar: &pb };

    let report = build_image(config, &store, &mut runner).await?;
    pb.finish_with_message("Provisioning complete");

    println!("{} Applying tags", "[3/3]".bold().blue());
    for tag in &report.applied_tags {
        println!("  {} {}", "✓".green(), tag);
    }
    for (tag, reason) in &report.failed_tags {
        // A failed alias degrades the release but does not fail it.
        warn!("Failed to apply tag {}: {}", tag, reason);
        println!("  {} {} ({})", "✗".red(), tag.yellow(), reason);
    }

    println!();
    if report.fully_tagged() {
        println!("{}", "Build completed successfully!".green().bold());
    } else {
        println!("{}", "Build completed with tag failures.".yellow().bold());
    }
    println!();
    println!("  Image ID:    {}", report.image_id.cyan());
    println!("  Rootfs:      {}", report.rootfs_path.display().to_string().yellow());
    println!("  Layers:      {}", report.layer_count);
    println!(
        "  Tags:        {}/{}",
        report.applied_tags.len(),
        report.applied_tags.len() + report.failed_tags.len()
    );
    println!("  Duration:    {}", format_duration(report.duration_secs).yellow());

    if with_docs {
        println!();
        println!("{} Generating documentation", "»".bold().blue());
        match DocsGenerator::new(config).generate() {
            Ok(api_doc) => {
                println!("  API docs: {}", api_doc.display().to_string().yellow());
            }
            Err(e) => {
                // Docs are a post-build extra; the image and tags stand.
                warn!("Documentation generation failed: {}", e);
                println!("  {} {}", "✗".red(), e);
            }
        }
    }

    Ok(())
}

/// Formats a duration in seconds to a human-readable string.
fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs - (mins * 60.0);
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    }
}
