//! API documentation pipeline.
//!
//! Runs after a successful build when requested: extract API docs from
//! the application sources into markdown, then render the site. The
//! pipeline is isolated from the build itself. When invoked alongside a
//! build, a docs failure degrades the run (warning, image and tags are
//! kept); when invoked standalone it is the whole operation and fails it.

use crate::config::Config;
use crate::error::{RcalError, Result};
use crate::paths;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, instrument};

/// Drives the two-stage extract/render documentation pipeline.
pub struct DocsGenerator {
    extract_command: Vec<String>,
    render_command: Vec<String>,
    output_dir: PathBuf,
}

impl DocsGenerator {
    pub fn new(config: &Config) -> Self {
        Self {
            extract_command: config.docs_extract_command.clone(),
            render_command: config.docs_render_command.clone(),
            output_dir: paths::docs_dir(Path::new(&config.data_dir)),
        }
    }

    /// Where the extracted markdown lands.
    pub fn api_doc_path(&self) -> PathBuf {
        self.output_dir.join("api.md")
    }

    /// Run the full pipeline: extract, then render.
    #[instrument(skip(self))]
    pub fn generate(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| RcalError::IoError { path: self.output_dir.clone(), source: e })?;

        let api_doc = self.extract()?;
        self.render()?;

        info!("Documentation generated at {}", self.output_dir.display());
        Ok(api_doc)
    }

    /// Extract API documentation to `docs/api.md`.
    ///
    /// The extractor writes markdown to stdout; we capture it and write
    /// the file ourselves so a failed run never leaves a truncated doc.
    fn extract(&self) -> Result<PathBuf> {
        let (tool, args) = split_command(&self.extract_command)?;
        debug!("Extracting API docs with {}", tool);

        let output = run_tool(tool, args, &self.output_dir)?;
        let api_doc = self.api_doc_path();
        std::fs::write(&api_doc, &output)
            .map_err(|e| RcalError::IoError { path: api_doc.clone(), source: e })?;

        Ok(api_doc)
    }

    /// Render the documentation site from the extracted markdown.
    fn render(&self) -> Result<()> {
        let (tool, args) = split_command(&self.render_command)?;
        debug!("Rendering docs with {}", tool);
        run_tool(tool, args, &self.output_dir)?;
        Ok(())
    }
}

fn split_command(command: &[String]) -> Result<(&str, &[String])> {
    match command.split_first() {
        Some((tool, args)) => Ok((tool.as_str(), args)),
        None => Err(RcalError::DocGenerationFailed { reason: "empty docs command".to_string() }),
    }
}

fn run_tool(tool: &str, args: &[String], cwd: &Path) -> Result<Vec<u8>> {
    let output = Command::new(tool).args(args).current_dir(cwd).output().map_err(|e| {
        RcalError::DocGenerationFailed {
            reason: format!("Failed to run {}: {}. Is it installed?", tool, e),
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RcalError::DocGenerationFailed {
            reason: format!("{} failed: {}", tool, stderr.trim()),
        });
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs_config(data_dir: &Path, extract: &[&str], render: &[&str]) -> Config {
        let mut config = Config::default();
        config.data_dir = data_dir.to_string_lossy().to_string();
        config.docs_extract_command = extract.iter().map(|s| s.to_string()).collect();
        config.docs_render_command = render.iter().map(|s| s.to_string()).collect();
        config
    }

    #[test]
    fn test_extract_output_written_to_api_doc() {
        let tmp = tempfile::tempdir().unwrap();
        let config =
            docs_config(tmp.path(), &["echo", "# rcalendar API"], &["true"]);
        let generator = DocsGenerator::new(&config);

        let api_doc = generator.generate().unwrap();
        let content = std::fs::read_to_string(&api_doc).unwrap();
        assert_eq!(content.trim(), "# rcalendar API");
        assert_eq!(api_doc, generator.api_doc_path());
    }

    #[test]
    fn test_failed_extractor_leaves_no_api_doc() {
        let tmp = tempfile::tempdir().unwrap();
        let config = docs_config(tmp.path(), &["false"], &["true"]);
        let generator = DocsGenerator::new(&config);

        let err = generator.generate().unwrap_err();
        assert!(matches!(err, RcalError::DocGenerationFailed { .. }));
        assert!(!generator.api_doc_path().exists());
    }

    #[test]
    fn test_missing_tool_reports_install_hint() {
        let tmp = tempfile::tempdir().unwrap();
        let config = docs_config(tmp.path(), &["rcal-no-such-tool"], &["true"]);
        let generator = DocsGenerator::new(&config);

        let err = generator.generate().unwrap_err();
        assert!(err.to_string().contains("Is it installed?"));
    }

    #[test]
    fn test_render_failure_after_successful_extract() {
        let tmp = tempfile::tempdir().unwrap();
        let config = docs_config(tmp.path(), &["echo", "docs"], &["false"]);
        let generator = DocsGenerator::new(&config);

        let err = generator.generate().unwrap_err();
        assert!(matches!(err, RcalError::DocGenerationFailed { .. }));
        // The extracted markdown survives a render failure.
        assert!(generator.api_doc_path().exists());
    }
}
