//! Image domain types.

use crate::error::{RcalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

/// Immutable description of one image release: what to call it and
/// where its aliases point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Image base name (e.g., "msa_rcalendar")
    pub base_name: String,

    /// Release version (semver-shaped, e.g., "0.0.0")
    pub version: String,

    /// Registry prefixes, in declared order. Order determines tag
    /// emission order but carries no other semantics.
    pub registries: Vec<String>,
}

impl ImageSpec {
    /// Validate the spec before building.
    pub fn validate(&self) -> Result<()> {
        if self.base_name.is_empty() {
            return Err(RcalError::InvalidSpec { reason: "base_name is empty".to_string() });
        }
        if self.version.is_empty() {
            return Err(RcalError::InvalidSpec { reason: "version is empty".to_string() });
        }
        if !is_semver_shaped(&self.version) {
            return Err(RcalError::InvalidSpec {
                reason: format!("version {:?} is not semver-shaped (expected X.Y.Z)", self.version),
            });
        }
        if self.registries.is_empty() {
            return Err(RcalError::InvalidSpec { reason: "no registries configured".to_string() });
        }
        for (i, registry) in self.registries.iter().enumerate() {
            if registry.is_empty() {
                return Err(RcalError::InvalidSpec {
                    reason: format!("registry at position {} is empty", i),
                });
            }
            if self.registries[..i].contains(registry) {
                return Err(RcalError::InvalidSpec {
                    reason: format!("duplicate registry: {}", registry),
                });
            }
        }
        Ok(())
    }

    /// The full set of tags for this spec: for each registry, the
    /// "latest" alias followed by the versioned alias. Always exactly
    /// `2 * registries.len()` unique elements; every tag is an alias for
    /// the same underlying build.
    pub fn tag_set(&self) -> Vec<String> {
        let mut tags = Vec::with_capacity(self.registries.len() * 2);
        for registry in &self.registries {
            tags.push(format!("{}/{}:latest", registry, self.base_name));
            tags.push(format!("{}/{}:{}", registry, self.base_name, self.version));
        }
        tags
    }
}

/// Check for an X.Y.Z shape with numeric components.
fn is_semver_shaped(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// A built image registered in the local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Image ID (sha256 over the ordered layer digest chain)
    pub id: String,

    /// Image manifest
    pub manifest: ImageManifest,

    /// Path to the image rootfs
    pub rootfs_path: PathBuf,

    /// Size in bytes
    pub size_bytes: u64,

    /// Creation timestamp
    pub created_at: SystemTime,
}

/// Image manifest (embedded in image).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Manifest schema version
    pub version: String,

    /// Image name
    pub name: String,

    /// Release version this image was built for
    pub image_version: String,

    /// Image architecture (x86_64, aarch64)
    pub architecture: String,

    /// Operating system (linux)
    pub os: String,

    /// Entrypoint program
    pub entrypoint: Vec<String>,

    /// Default command argument (overridable by the caller)
    pub cmd: Vec<String>,

    /// Environment variables baked into the image
    pub env: BTreeMap<String, String>,

    /// Working directory
    pub workdir: String,

    /// Runtime identity the process holds for its entire lifetime
    pub identity: Option<RuntimeIdentity>,

    /// Declared network port
    pub exposed_port: Option<u16>,

    /// OS packages present in the final artifact, sorted. Build-time-only
    /// packages must not appear here.
    pub installed_packages: Vec<String>,

    /// Layer history, one entry per provisioning step
    #[serde(default)]
    pub history: Vec<Layer>,
}

/// One layer in the image: an immutable filesystem diff produced by a
/// single provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer digest (sha256, chained over the parent digest)
    pub digest: String,

    /// The provisioning step that created this layer
    pub created_by: String,

    /// True if the step added no files (metadata-only steps)
    #[serde(default)]
    pub empty_layer: bool,
}

/// Non-root service identity baked into the image at build time.
///
/// Created once per build, never mutated after ownership transfer; the
/// running process never re-escalates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    /// Account name
    pub user: String,

    /// Fixed numeric uid (deterministic across rebuilds)
    pub uid: u32,

    /// Fixed numeric gid
    pub gid: u32,

    /// Home directory
    pub home_dir: PathBuf,

    /// Paths owned by this identity after the ownership transfer
    pub owned_paths: Vec<PathBuf>,
}
