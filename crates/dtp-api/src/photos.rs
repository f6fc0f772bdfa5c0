//! Report photo storage.
//!
//! Uploads for one report are a saga: all files are sent concurrently, and
//! when any of them fails the ones that made it are deleted again so no
//! orphaned images are left behind. Failed compensations are logged and
//! never retried.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use serde::Deserialize;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use dtp_types::api::Photo;

use crate::error::ApiError;

pub const MAX_PHOTOS: usize = 2;
pub const MAX_PHOTO_SIZE: usize = 5 * 1024 * 1024;

/// A photo received from the client, not yet stored.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub original_name: String,
    pub mimetype: String,
    pub data: Bytes,
}

/// What the storage backend hands back for one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPhoto {
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub file_id: String,
}

#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn upload(&self, photo: &PhotoUpload) -> Result<StoredPhoto>;

    /// Deleting an id that is already gone is not an error.
    async fn delete(&self, file_id: &str) -> Result<()>;
}

/// Uploads every photo or none of them.
pub async fn upload_all(store: &dyn PhotoStore, uploads: &[PhotoUpload]) -> Result<Vec<Photo>, ApiError> {
    if uploads.is_empty() {
        return Ok(Vec::new());
    }

    let results = join_all(uploads.iter().map(|p| store.upload(p))).await;

    let mut stored = Vec::with_capacity(uploads.len());
    let mut failures = 0;
    for (upload, result) in uploads.iter().zip(results) {
        match result {
            Ok(meta) => stored.push(Photo {
                url: meta.url,
                thumbnail_url: meta.thumbnail_url,
                file_id: meta.file_id,
                original_name: upload.original_name.clone(),
                size: upload.data.len() as u64,
                mimetype: upload.mimetype.clone(),
            }),
            Err(e) => {
                error!("Photo upload failed for '{}': {:#}", upload.original_name, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        compensate(store, &stored).await;
        return Err(ApiError::Upload("Failed to upload one or more photos".into()));
    }

    Ok(stored)
}

/// Best-effort delete of already stored photos. Returns how many deletes
/// succeeded.
pub async fn compensate(store: &dyn PhotoStore, stored: &[Photo]) -> usize {
    let results = join_all(stored.iter().map(|p| store.delete(&p.file_id))).await;

    let mut deleted = 0;
    for (photo, result) in stored.iter().zip(results) {
        match result {
            Ok(()) => deleted += 1,
            Err(e) => warn!("Rollback delete failed for {}: {:#}", photo.file_id, e),
        }
    }
    if !stored.is_empty() {
        info!("Rolled back {}/{} stored photos", deleted, stored.len());
    }
    deleted
}

// -- Local disk --

/// Stores photos as flat files in one directory, served back under
/// `public_url`.
pub struct DiskPhotoStore {
    dir: PathBuf,
    public_url: String,
}

impl DiskPhotoStore {
    pub async fn new(dir: PathBuf, public_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Photo storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, file_id: &str) -> Result<PathBuf> {
        // Ids are generated here, but deletes take them back from the DB.
        if file_id.is_empty() || file_id.contains(['/', '\\']) || file_id.starts_with('.') {
            anyhow::bail!("Invalid photo id '{}'", file_id);
        }
        Ok(self.dir.join(file_id))
    }
}

#[async_trait]
impl PhotoStore for DiskPhotoStore {
    async fn upload(&self, photo: &PhotoUpload) -> Result<StoredPhoto> {
        let file_id = format!("{}{}", Uuid::new_v4(), extension(&photo.original_name));
        let path = self.file_path(&file_id)?;
        fs::write(&path, &photo.data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let url = format!("{}/{}", self.public_url, file_id);
        Ok(StoredPhoto {
            thumbnail_url: Some(url.clone()),
            url,
            file_id,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let path = self.file_path(file_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted photo {}", file_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Photo {} already gone", file_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lowercased `.ext` of an uploaded file name, if it looks like one.
fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

// -- ImageKit --

const IMAGEKIT_UPLOAD_URL: &str = "https://upload.imagekit.io/api/v1/files/upload";
const IMAGEKIT_FILES_URL: &str = "https://api.imagekit.io/v1/files";

/// ImageKit media library, authenticated with the account's private key.
pub struct ImageKitStore {
    client: reqwest::Client,
    private_key: String,
    folder: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageKitFile {
    file_id: String,
    url: String,
    thumbnail_url: Option<String>,
}

impl ImageKitStore {
    pub fn new(private_key: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            private_key: private_key.into(),
            folder: folder.into(),
        }
    }
}

#[async_trait]
impl PhotoStore for ImageKitStore {
    async fn upload(&self, photo: &PhotoUpload) -> Result<StoredPhoto> {
        let part = reqwest::multipart::Part::bytes(photo.data.to_vec())
            .file_name(photo.original_name.clone())
            .mime_str(&photo.mimetype)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("fileName", photo.original_name.clone())
            .text("folder", self.folder.clone())
            .text("useUniqueFileName", "true");

        let file: ImageKitFile = self
            .client
            .post(IMAGEKIT_UPLOAD_URL)
            .basic_auth(&self.private_key, Some(""))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Unexpected ImageKit upload response")?;

        Ok(StoredPhoto {
            url: file.url,
            thumbnail_url: file.thumbnail_url,
            file_id: file.file_id,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/{}", IMAGEKIT_FILES_URL, file_id))
            .basic_auth(&self.private_key, Some(""))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            warn!("ImageKit file {} already gone", file_id);
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails uploads whose name contains "fail"; deletes of ids containing
    /// "stuck" fail too.
    #[derive(Default)]
    struct ScriptedStore {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PhotoStore for ScriptedStore {
        async fn upload(&self, photo: &PhotoUpload) -> Result<StoredPhoto> {
            if photo.original_name.contains("fail") {
                anyhow::bail!("remote rejected {}", photo.original_name);
            }
            Ok(StoredPhoto {
                url: format!("https://img.test/{}", photo.original_name),
                thumbnail_url: None,
                file_id: format!("id-{}", photo.original_name),
            })
        }

        async fn delete(&self, file_id: &str) -> Result<()> {
            if file_id.contains("stuck") {
                anyhow::bail!("delete refused");
            }
            self.deleted.lock().unwrap().push(file_id.to_string());
            Ok(())
        }
    }

    fn upload(name: &str) -> PhotoUpload {
        PhotoUpload {
            original_name: name.into(),
            mimetype: "image/png".into(),
            data: Bytes::from_static(b"\x89PNG...."),
        }
    }

    #[tokio::test]
    async fn all_uploads_succeed() {
        let store = ScriptedStore::default();
        let photos = upload_all(&store, &[upload("a.png"), upload("b.png")]).await.unwrap();
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].file_id, "id-a.png");
        assert_eq!(photos[1].size, 8);
        assert!(store.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failure_rolls_back_the_rest() {
        let store = ScriptedStore::default();
        let err = upload_all(&store, &[upload("a.png"), upload("fail.png")]).await.unwrap_err();
        assert!(matches!(err, ApiError::Upload(_)));
        assert_eq!(*store.deleted.lock().unwrap(), vec!["id-a.png".to_string()]);
    }

    #[tokio::test]
    async fn compensation_failures_are_counted_not_raised() {
        let store = ScriptedStore::default();
        let err = upload_all(&store, &[upload("stuck.png"), upload("fail.png")]).await;
        assert!(err.is_err());
        assert!(store.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disk_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("dtp_photos_{}", Uuid::new_v4()));
        let store = DiskPhotoStore::new(dir.clone(), "http://localhost:5000/uploads/").await.unwrap();

        let stored = store.upload(&upload("Ward 3.JPG")).await.unwrap();
        assert!(stored.file_id.ends_with(".jpg"));
        assert_eq!(stored.url, format!("http://localhost:5000/uploads/{}", stored.file_id));
        assert!(dir.join(&stored.file_id).exists());

        store.delete(&stored.file_id).await.unwrap();
        assert!(!dir.join(&stored.file_id).exists());
        // second delete is a no-op
        store.delete(&stored.file_id).await.unwrap();
        assert!(store.delete("../etc/passwd").await.is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(extension("scan.PNG"), ".png");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension("evil.p/hp"), "");
    }
}
