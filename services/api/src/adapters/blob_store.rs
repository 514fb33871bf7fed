//! services/api/src/adapters/blob_store.rs
//!
//! Durable homework image storage on the local filesystem. Files are written under
//! `MEDIA_ROOT/<user_id>/` and served back by the router at `/media`. Only images that
//! arrived inline with the request are written; server paths are refused.

use std::path::{Path, PathBuf};

use amibuddy_core::domain::ImageRef;
use amibuddy_core::ports::{BlobStorage, PortError, PortResult};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::image_source::decode_inline;

pub const MEDIA_ROUTE: &str = "/media";

#[derive(Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
    max_image_bytes: usize,
}

impl FsBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_image_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStorage for FsBlobStore {
    async fn store_image(&self, user_id: Uuid, image: &ImageRef) -> PortResult<ImageRef> {
        if !image.needs_upload() {
            return Ok(image.clone());
        }

        let data = decode_inline(image, self.max_image_bytes)?;
        let dir = self.root.join(user_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to create {}: {}", dir.display(), e)))?;

        let file_name = format!("{}.{}", Uuid::new_v4(), data.extension());
        let path = dir.join(&file_name);
        tokio::fs::write(&path, &data.bytes)
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to write {}: {}", path.display(), e)))?;
        info!("Stored homework image at {}", path.display());

        Ok(ImageRef::new(format!(
            "{}{}/{}/{}",
            self.public_base_url, MEDIA_ROUTE, user_id, file_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_uri_is_written_and_published() {
        let media = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(media.path(), "https://buddy.test/", 1024);
        let user_id = Uuid::new_v4();

        let stored = store
            .store_image(user_id, &ImageRef::new("data:image/png;base64,aGVsbG8="))
            .await
            .unwrap();

        let prefix = format!("https://buddy.test/media/{}/", user_id);
        assert!(stored.as_str().starts_with(&prefix));
        assert!(stored.as_str().ends_with(".png"));
        let file_name = stored.as_str().trim_start_matches(&prefix);
        let written = std::fs::read(media.path().join(user_id.to_string()).join(file_name)).unwrap();
        assert_eq!(written, b"hello");
    }

    #[tokio::test]
    async fn remote_images_are_kept_as_is() {
        let media = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(media.path(), "https://buddy.test", 1024);
        let remote = ImageRef::new("https://cdn.test/homework.jpg");

        let stored = store.store_image(Uuid::new_v4(), &remote).await.unwrap();

        assert_eq!(stored, remote);
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn server_files_are_never_published() {
        let media = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("server_secret.env");
        std::fs::write(&secret, "DATABASE_URL=postgres://admin:pw@db").unwrap();
        let store = FsBlobStore::new(media.path(), "https://buddy.test", 1024);
        let user_id = Uuid::new_v4();

        for reference in [
            "/etc/passwd".to_string(),
            "file:///etc/passwd".to_string(),
            secret.display().to_string(),
            format!("file://{}", secret.display()),
        ] {
            let err = store
                .store_image(user_id, &ImageRef::new(reference))
                .await
                .unwrap_err();
            assert!(matches!(err, PortError::PermissionDenied(_)));
        }
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }
}
