//! CLI command implementations

pub mod build;
pub mod docs;
pub mod images;
pub mod tags;
pub mod validate;

pub use build::build;
pub use docs::docs;
pub use images::images;
pub use tags::tags;
pub use validate::validate;

use anyhow::{Context, Result};
use rcal_core::{paths, Config, ImageStore};
use std::path::Path;

/// Open the image store under the configured data directory.
pub(crate) async fn open_store(config: &Config) -> Result<ImageStore> {
    let db_path = paths::db_path(Path::new(&config.data_dir));
    ImageStore::new(&db_path).await.with_context(|| "Failed to open image store")
}
