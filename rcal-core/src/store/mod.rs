//! Image and tag store with SQLite persistence.
//!
//! The store is the single shared surface between concurrent builder
//! invocations. Tags are aliases: many tags may point at one image, a
//! tag points at exactly one image, and re-applying a tag is an upsert
//! with last-write-wins semantics (an explicit policy here, not an
//! accident of the underlying layering mechanism).

use crate::error::{RcalError, Result};
use crate::types::Image;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{info, instrument};

pub mod migrations;

/// A tag binding in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBinding {
    pub tag: String,
    pub image_id: String,
    pub applied_at: SystemTime,
}

/// Persistent image/tag store.
#[derive(Clone)]
pub struct ImageStore {
    pool: SqlitePool,
}

impl ImageStore {
    /// Create a store backed by an in-memory database (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Open (or create) the store at the given path.
    #[instrument(skip(db_path))]
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("Opening image store at {:?}", db_path);

        // Create parent directory if it doesn't exist (but not for :memory:)
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RcalError::InvalidConfig {
                        reason: format!("Failed to create directory {}: {}", parent.display(), e),
                    }
                })?;
            }
        }

        let mut options = SqliteConnectOptions::from_str(db_path.to_str().ok_or_else(|| {
            RcalError::InvalidConfig { reason: "Invalid database path".to_string() }
        })?)
        .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        options = options.create_if_missing(true).log_statements(tracing::log::LevelFilter::Debug);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        let store = Self { pool };
        migrations::run(&store.pool).await?;

        Ok(store)
    }

    // ========================
    // Image operations
    // ========================

    /// Register a built image.
    ///
    /// The image row is committed before any tag is applied, so abrupt
    /// termination never leaves a tag referencing an absent artifact.
    #[instrument(skip(self, image), fields(image_id = %image.id))]
    pub async fn insert_image(&self, image: &Image) -> Result<()> {
        let manifest_json = serde_json::to_string(&image.manifest).map_err(|e| {
            RcalError::DatabaseError(format!("Failed to serialize manifest: {}", e))
        })?;

        let created_at = unix_secs(image.created_at);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO images (id, name, version, manifest, rootfs_path, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.id)
        .bind(&image.manifest.name)
        .bind(&image.manifest.image_version)
        .bind(manifest_json)
        .bind(image.rootfs_path.to_str())
        .bind(image.size_bytes as i64)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Get an image by ID.
    #[instrument(skip(self), fields(image_id = %id))]
    pub async fn get_image(&self, id: &str) -> Result<Image> {
        let row = sqlx::query("SELECT * FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?
            .ok_or_else(|| RcalError::ImageNotFound { image: id.to_string() })?;

        row_to_image(row)
    }

    /// List all images, newest first.
    #[instrument(skip(self))]
    pub async fn list_images(&self) -> Result<Vec<Image>> {
        let rows = sqlx::query("SELECT * FROM images ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(row_to_image).collect()
    }

    /// Delete an image and every tag pointing at it.
    #[instrument(skip(self), fields(image_id = %id))]
    pub async fn delete_image(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tags WHERE image_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    // ========================
    // Tag operations
    // ========================

    /// Point a tag at an image, overwriting any previous binding.
    ///
    /// Returns the previously bound image ID, if any. Overwrite is always
    /// permitted: "latest" aliases are expected to be reassigned on every
    /// build.
    #[instrument(skip(self), fields(tag = %tag, image_id = %image_id))]
    pub async fn apply_tag(&self, tag: &str, image_id: &str) -> Result<Option<String>> {
        // The target image must already be registered.
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM images WHERE id = ?")
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RcalError::TagFailed { tag: tag.to_string(), reason: e.to_string() })?;
        if exists.is_none() {
            return Err(RcalError::TagFailed {
                tag: tag.to_string(),
                reason: format!("image {} is not registered", image_id),
            });
        }

        let previous: Option<String> = sqlx::query_scalar("SELECT image_id FROM tags WHERE tag = ?")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RcalError::TagFailed { tag: tag.to_string(), reason: e.to_string() })?;

        let applied_at = unix_secs(SystemTime::now());

        sqlx::query(
            r#"
            INSERT INTO tags (tag, image_id, applied_at)
            VALUES (?, ?, ?)
            ON CONFLICT(tag) DO UPDATE SET image_id = excluded.image_id, applied_at = excluded.applied_at
            "#,
        )
        .bind(tag)
        .bind(image_id)
        .bind(applied_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RcalError::TagFailed { tag: tag.to_string(), reason: e.to_string() })?;

        Ok(previous)
    }

    /// Resolve a tag to the image it points at.
    #[instrument(skip(self), fields(tag = %tag))]
    pub async fn resolve_tag(&self, tag: &str) -> Result<Image> {
        let image_id: Option<String> = sqlx::query_scalar("SELECT image_id FROM tags WHERE tag = ?")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        match image_id {
            Some(id) => self.get_image(&id).await,
            None => Err(RcalError::ImageNotFound { image: tag.to_string() }),
        }
    }

    /// List all tag bindings, sorted by tag.
    #[instrument(skip(self))]
    pub async fn list_tags(&self) -> Result<Vec<TagBinding>> {
        let rows = sqlx::query("SELECT tag, image_id, applied_at FROM tags ORDER BY tag")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_binding).collect())
    }

    /// Tags currently pointing at an image.
    #[instrument(skip(self), fields(image_id = %image_id))]
    pub async fn tags_for_image(&self, image_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar("SELECT tag FROM tags WHERE image_id = ? ORDER BY tag")
            .bind(image_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RcalError::DatabaseError(e.to_string()))?;

        Ok(rows)
    }
}

fn unix_secs(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn row_to_image(row: sqlx::sqlite::SqliteRow) -> Result<Image> {
    let manifest_json: String = row.get("manifest");
    let manifest = serde_json::from_str(&manifest_json)
        .map_err(|e| RcalError::DatabaseError(format!("Failed to deserialize manifest: {}", e)))?;

    let created_at_secs: i64 = row.get("created_at");
    let created_at =
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(created_at_secs as u64);

    let size_bytes: i64 = row.get("size_bytes");

    Ok(Image {
        id: row.get("id"),
        manifest,
        rootfs_path: row.get::<String, _>("rootfs_path").into(),
        size_bytes: size_bytes as u64,
        created_at,
    })
}

fn row_to_binding(row: sqlx::sqlite::SqliteRow) -> TagBinding {
    let applied_at_secs: i64 = row.get("applied_at");
    TagBinding {
        tag: row.get("tag"),
        image_id: row.get("image_id"),
        applied_at: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(applied_at_secs as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageManifest, RuntimeIdentity};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn test_image(id: &str) -> Image {
        Image {
            id: id.to_string(),
            manifest: ImageManifest {
                version: "1".to_string(),
                name: "msa_rcalendar".to_string(),
                image_version: "0.0.0".to_string(),
                architecture: "x86_64".to_string(),
                os: "linux".to_string(),
                entrypoint: vec!["python3".to_string(), "manage.py".to_string()],
                cmd: vec!["runserver".to_string()],
                env: BTreeMap::new(),
                workdir: "/srv/msa_rcalendar".to_string(),
                identity: Some(RuntimeIdentity {
                    user: "rcalendar".to_string(),
                    uid: 1000,
                    gid: 1000,
                    home_dir: PathBuf::from("/home/rcalendar"),
                    owned_paths: vec![],
                }),
                exposed_port: Some(8000),
                installed_packages: vec!["python3".to_string()],
                history: vec![],
            },
            rootfs_path: PathBuf::from("/tmp/rootfs"),
            size_bytes: 42,
            created_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_image() {
        let store = ImageStore::new_in_memory().await.unwrap();
        store.insert_image(&test_image("sha256:aaa")).await.unwrap();

        let image = store.get_image("sha256:aaa").await.unwrap();
        assert_eq!(image.manifest.name, "msa_rcalendar");
        assert_eq!(image.manifest.exposed_port, Some(8000));
    }

    #[tokio::test]
    async fn test_apply_tag_requires_registered_image() {
        let store = ImageStore::new_in_memory().await.unwrap();
        let err = store.apply_tag("ncrawler/msa_rcalendar:latest", "sha256:missing").await;
        assert!(matches!(err, Err(RcalError::TagFailed { .. })));
    }

    #[tokio::test]
    async fn test_apply_tag_last_write_wins() {
        let store = ImageStore::new_in_memory().await.unwrap();
        store.insert_image(&test_image("sha256:aaa")).await.unwrap();
        store.insert_image(&test_image("sha256:bbb")).await.unwrap();

        let tag = "ncrawler/msa_rcalendar:latest";
        let previous = store.apply_tag(tag, "sha256:aaa").await.unwrap();
        assert_eq!(previous, None);

        let previous = store.apply_tag(tag, "sha256:bbb").await.unwrap();
        assert_eq!(previous.as_deref(), Some("sha256:aaa"));

        let resolved = store.resolve_tag(tag).await.unwrap();
        assert_eq!(resolved.id, "sha256:bbb");

        // One binding per tag: no stale alias remains.
        let bindings = store.list_tags().await.unwrap();
        assert_eq!(bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_tags_for_image() {
        let store = ImageStore::new_in_memory().await.unwrap();
        store.insert_image(&test_image("sha256:aaa")).await.unwrap();
        store.apply_tag("ncrawler/msa_rcalendar:latest", "sha256:aaa").await.unwrap();
        store.apply_tag("ncrawler/msa_rcalendar:0.0.0", "sha256:aaa").await.unwrap();

        let tags = store.tags_for_image("sha256:aaa").await.unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_image_removes_tags() {
        let store = ImageStore::new_in_memory().await.unwrap();
        store.insert_image(&test_image("sha256:aaa")).await.unwrap();
        store.apply_tag("ncrawler/msa_rcalendar:latest", "sha256:aaa").await.unwrap();

        store.delete_image("sha256:aaa").await.unwrap();
        assert!(store.get_image("sha256:aaa").await.is_err());
        assert!(store.list_tags().await.unwrap().is_empty());
    }
}
