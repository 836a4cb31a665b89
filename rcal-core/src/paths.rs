//! Centralized path configuration for rcal.
//!
//! All data paths go through this module so the builder, the store, the
//! docs pipeline, and the CLI agree on where artifacts live. `data_dir`
//! resolves the default base directory; everything below it takes the
//! configured base explicitly so tests and alternate installs can
//! relocate the whole tree through `Config::data_dir`.

use std::path::{Path, PathBuf};

/// Get the default rcal data directory.
///
/// Resolution order:
/// 1. `RCAL_DATA_DIR` environment variable
/// 2. `/var/lib/rcal` if it exists (system install)
/// 3. `~/.rcal` for user-only installs
pub fn data_dir() -> PathBuf {
    // Check environment variable first
    if let Ok(dir) = std::env::var("RCAL_DATA_DIR") {
        return PathBuf::from(dir);
    }

    // Check if system install exists
    let system_dir = PathBuf::from("/var/lib/rcal");
    if system_dir.exists() {
        return system_dir;
    }

    // Fall back to user home directory
    dirs::home_dir().map(|h| h.join(".rcal")).unwrap_or(system_dir)
}

/// Get the configuration directory.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RCAL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    data_dir()
}

/// Get the image store database path.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("rcal.db")
}

/// Get the images directory.
pub fn images_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("images")
}

/// Get the cache directory (ephemeral build roots live here).
pub fn cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("cache")
}

/// Get the documentation output directory.
pub fn docs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("docs")
}

/// Get the directory for a specific registered image.
pub fn image_dir(data_dir: &Path, image_id: &str) -> PathBuf {
    images_dir(data_dir).join(image_id.replace(':', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths_share_the_base() {
        let base = Path::new("/tmp/rcal-test");
        assert_eq!(db_path(base), PathBuf::from("/tmp/rcal-test/rcal.db"));
        assert!(images_dir(base).starts_with(base));
        assert!(cache_dir(base).starts_with(base));
        assert!(docs_dir(base).starts_with(base));
    }

    #[test]
    fn test_image_dir_escapes_digest_colon() {
        let base = Path::new("/tmp/rcal-test");
        let dir = image_dir(base, "sha256:abcd");
        assert!(!dir.file_name().unwrap().to_string_lossy().contains(':'));
        assert!(dir.starts_with(images_dir(base)));
    }
}
