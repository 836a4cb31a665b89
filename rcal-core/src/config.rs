//! Configuration management.
//!
//! One release of the calendar service is described entirely by this
//! configuration: the image spec (name, version, registry aliases), the
//! provisioning inputs (package sets, directories, service account), and
//! the runtime contract baked into the final artifact.

use crate::error::{RcalError, Result};
use crate::paths;
use crate::types::ImageSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Persistent configuration for rcal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Image spec
    pub base_name: String,
    pub version: String,
    pub registries: Vec<String>,

    // Service account (fixed numeric identity, never auto-assigned)
    pub service_user: String,
    pub service_uid: u32,
    pub service_gid: u32,
    pub home_dir: String,

    // Application tree inside the image
    pub app_dir: String,
    /// Writable runtime directories created at build time, relative to `app_dir`.
    pub runtime_dirs: Vec<String>,

    // OS packages
    pub runtime_packages: Vec<String>,
    /// Build-time-only packages; installed before language deps, fully
    /// removed afterwards.
    pub build_packages: Vec<String>,
    /// Pre-existing packages stripped from the base image.
    pub unwanted_packages: Vec<String>,

    // Language-level dependencies
    pub requirements_file: String,
    pub package_tool: String,
    pub pip_command: String,

    // Runtime contract
    pub service_port: u16,
    pub entrypoint: Vec<String>,
    /// Default command argument; overridable by the caller at container start.
    pub cmd: Vec<String>,
    pub baked_env: BTreeMap<String, String>,

    // Documentation pipeline
    pub docs_extract_command: Vec<String>,
    pub docs_render_command: Vec<String>,

    // Ambient
    pub log_level: String,
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        let mut baked_env = BTreeMap::new();
        // Recognized by the service at runtime: containerized execution
        // marker and unbuffered output.
        baked_env.insert("DOCKERIZED".to_string(), "yes".to_string());
        baked_env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        Self {
            base_name: "msa_rcalendar".to_string(),
            version: "0.0.0".to_string(),
            registries: vec!["docker.force.fm/msa".to_string(), "ncrawler".to_string()],
            service_user: "rcalendar".to_string(),
            service_uid: 1000,
            service_gid: 1000,
            home_dir: "/home/rcalendar".to_string(),
            app_dir: "/srv/msa_rcalendar".to_string(),
            runtime_dirs: vec![
                "log".to_string(),
                "run".to_string(),
                "static".to_string(),
                "media".to_string(),
            ],
            runtime_packages: vec![
                "python3".to_string(),
                "py3-pip".to_string(),
                "ca-certificates".to_string(),
            ],
            build_packages: vec![
                "gcc".to_string(),
                "musl-dev".to_string(),
                "python3-dev".to_string(),
                "libffi-dev".to_string(),
            ],
            unwanted_packages: vec!["man-pages".to_string()],
            requirements_file: "requirements.txt".to_string(),
            package_tool: "apk".to_string(),
            pip_command: "pip3".to_string(),
            service_port: 8000,
            entrypoint: vec!["python3".to_string(), "manage.py".to_string()],
            cmd: vec!["runserver".to_string(), "0.0.0.0:8000".to_string()],
            baked_env,
            docs_extract_command: vec![
                "pydoc-markdown".to_string(),
                "-p".to_string(),
                "rcalendar".to_string(),
            ],
            docs_render_command: vec!["mkdocs".to_string(), "build".to_string()],
            log_level: "info".to_string(),
            data_dir: paths::data_dir().to_string_lossy().to_string(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from disk.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| RcalError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| RcalError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RcalError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| RcalError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(&path, content).map_err(|e| RcalError::IoError { path, source: e })
    }

    /// The image spec described by this configuration.
    pub fn image_spec(&self) -> ImageSpec {
        ImageSpec {
            base_name: self.base_name.clone(),
            version: self.version.clone(),
            registries: self.registries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_release() {
        let config = Config::default();
        assert_eq!(config.base_name, "msa_rcalendar");
        assert_eq!(config.registries.len(), 2);
        assert_eq!(config.service_port, 8000);
        assert_eq!(config.service_uid, 1000);
        assert_eq!(config.baked_env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_default_runtime_dirs() {
        let config = Config::default();
        for dir in ["log", "run", "static", "media"] {
            assert!(config.runtime_dirs.iter().any(|d| d == dir), "missing {}", dir);
        }
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.base_name, config.base_name);
        assert_eq!(parsed.registries, config.registries);
        assert_eq!(parsed.build_packages, config.build_packages);
    }
}
