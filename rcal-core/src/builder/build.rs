//! Centralized image building API for rcal.
//!
//! This is the orchestrator behind `rcal build`:
//! 1. Validate the image spec and the provisioning sequence.
//! 2. Execute the sequence in a fresh build root.
//! 3. Register the image in the store.
//! 4. Apply every tag in the derived tag set, independently per alias.
//!
//! A provisioning failure aborts the build. A tag failure does not: tags
//! are aliases applied after the artifact exists, each one succeeds or
//! fails on its own and is reported per-alias.

use crate::config::Config;
use crate::error::{RcalError, Result};
use crate::paths;
use crate::provision::{execute_sequence, ProvisionState, ProvisioningSequence, StepRunner};
use crate::store::ImageStore;
use crate::types::Image;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, instrument, warn};

/// Outcome of one build invocation.
///
/// `failed_tags` being non-empty is a partial success, explicitly
/// distinct from a failed build: the artifact exists and the remaining
/// aliases were applied.
#[derive(Debug)]
pub struct BuildReport {
    /// ID of the built image.
    pub image_id: String,

    /// Number of layers produced.
    pub layer_count: usize,

    /// Tags successfully applied, in emission order.
    pub applied_tags: Vec<String>,

    /// Tags that could not be applied, with the per-alias reason.
    pub failed_tags: Vec<(String, String)>,

    /// Where the rootfs was persisted.
    pub rootfs_path: PathBuf,

    /// Wall-clock build duration.
    pub duration_secs: f64,
}

impl BuildReport {
    /// True if the build artifact exists and every alias was applied.
    pub fn fully_tagged(&self) -> bool {
        self.failed_tags.is_empty()
    }
}

/// Build an image from the release configuration and tag it under every
/// configured alias.
#[instrument(skip(config, store, runner), fields(name = %config.base_name, version = %config.version))]
pub async fn build_image(
    config: &Config,
    store: &ImageStore,
    runner: &mut dyn StepRunner,
) -> Result<BuildReport> {
    let start_time = std::time::Instant::now();

    let spec = config.image_spec();
    spec.validate()?;

    info!("Building image {} {}", spec.base_name, spec.version);

    // Phase 1: derive and validate the provisioning sequence.
    let sequence = ProvisioningSequence::from_config(config);
    sequence.validate()?;
    debug!("Provisioning sequence ready: {} steps", sequence.len());

    // Phase 2: execute in a fresh build root.
    let data_dir = PathBuf::from(&config.data_dir);
    let build_root =
        paths::cache_dir(&data_dir).join(format!("build-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&build_root)
        .map_err(|e| RcalError::IoError { path: build_root.clone(), source: e })?;

    let mut state = ProvisionState::new(build_root.clone(), config);
    let provision_result = execute_sequence(&sequence, runner, &mut state);

    if let Err(e) = provision_result {
        // No partial image is ever registered or tagged.
        let _ = std::fs::remove_dir_all(&build_root);
        return Err(e);
    }

    // Phase 3: register the image.
    let image_id = state.image_id();
    let manifest = state.manifest()?;
    let rootfs_path = persist_rootfs(&data_dir, &build_root, &image_id)?;
    let size_bytes = dir_size(&rootfs_path);

    let image = Image {
        id: image_id.clone(),
        manifest,
        rootfs_path: rootfs_path.clone(),
        size_bytes,
        created_at: SystemTime::now(),
    };

    store.insert_image(&image).await?;
    info!("Image registered: {}", image_id);

    // Phase 4: apply every alias independently. Failures are warnings,
    // retryable, and never roll back the build or block other aliases.
    let mut applied_tags = Vec::new();
    let mut failed_tags = Vec::new();
    for tag in spec.tag_set() {
        match store.apply_tag(&tag, &image_id).await {
            Ok(Some(previous)) if previous != image_id => {
                debug!("Tag {} moved from {}", tag, previous);
                applied_tags.push(tag);
            }
            Ok(_) => {
                applied_tags.push(tag);
            }
            Err(e) => {
                warn!("Failed to apply tag {}: {}", tag, e);
                failed_tags.push((tag, e.to_string()));
            }
        }
    }

    let duration = start_time.elapsed();
    info!(
        "Build completed in {:.1}s: image_id={} tags={}/{}",
        duration.as_secs_f64(),
        image_id,
        applied_tags.len(),
        applied_tags.len() + failed_tags.len()
    );

    Ok(BuildReport {
        image_id,
        layer_count: state.layers.len(),
        applied_tags,
        failed_tags,
        rootfs_path,
        duration_secs: duration.as_secs_f64(),
    })
}

/// Move the assembled rootfs to its permanent location under the images
/// directory.
fn persist_rootfs(data_dir: &Path, build_root: &PathBuf, image_id: &str) -> Result<PathBuf> {
    let image_dir = paths::image_dir(data_dir, image_id);
    std::fs::create_dir_all(&image_dir)
        .map_err(|e| RcalError::IoError { path: image_dir.clone(), source: e })?;

    let rootfs_path = image_dir.join("rootfs");
    if rootfs_path.exists() {
        // Same content (the ID is content-derived); drop the fresh copy.
        let _ = std::fs::remove_dir_all(build_root);
        return Ok(rootfs_path);
    }

    std::fs::rename(build_root, &rootfs_path)
        .map_err(|e| RcalError::IoError { path: rootfs_path.clone(), source: e })?;
    Ok(rootfs_path)
}

/// Total size of a directory tree in bytes.
fn dir_size(path: &PathBuf) -> u64 {
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                total += dir_size(&entry_path);
            } else if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    total
}
