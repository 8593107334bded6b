//! # Image Store
//!
//! Filesystem-backed storage of one image per screen id, named
//! `{data_root}/{screen_id}.{jpg|png}`.
//!
//! ## Rules:
//! - **Extension selection**: `image/png` is stored as `.png`; every other
//!   `image/*` type (and an absent content type) is stored as `.jpg`. The
//!   bytes themselves are not inspected.
//! - **Single file per id**: before writing, the sibling file of the other
//!   extension is deleted. A failed delete aborts the upload so two files
//!   never coexist.
//! - **Per-id serialization**: uploads for the same id take a per-id lock
//!   around delete-then-write-then-register. Different ids never contend.
//! - **Serving** is a pure filesystem lookup and does not consult the
//!   registry. `serve` tries `.jpg` first, then `.png`; `serve_as` reads only
//!   the requested extension.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TrmnlError};
use crate::registry::{normalize_screen_id, ScreenRegistry};

/// Supported on-disk image formats, in serve lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Lookup order used by `ImageStore::serve`.
    pub const LOOKUP_ORDER: [ImageFormat; 2] = [ImageFormat::Jpeg, ImageFormat::Png];

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    /// The other supported format, whose file goes stale on upload.
    pub fn sibling(self) -> ImageFormat {
        match self {
            ImageFormat::Jpeg => ImageFormat::Png,
            ImageFormat::Png => ImageFormat::Jpeg,
        }
    }

    /// Maps a file extension (`jpg`/`png`, case-insensitive) to a format.
    pub fn from_extension(ext: &str) -> Option<ImageFormat> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            _ => None,
        }
    }

    /// Selects the storage format for an upload's declared content type.
    ///
    /// The media type essence (before any `;` parameters) must start with
    /// `image/`. `None` is treated as `image/jpeg`.
    pub fn from_content_type(content_type: Option<&str>) -> Result<ImageFormat> {
        let Some(raw) = content_type else {
            return Ok(ImageFormat::Jpeg);
        };
        let essence = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if !essence.starts_with("image/") {
            return Err(TrmnlError::InvalidContentType(raw.to_string()));
        }
        Ok(match essence.as_str() {
            "image/png" => ImageFormat::Png,
            _ => ImageFormat::Jpeg,
        })
    }
}

/// Relative URL path under which an image is served.
pub fn image_url_path(screen_id: &str, format: ImageFormat) -> String {
    format!("/screens/{}.{}", screen_id, format.extension())
}

/// Normalizes `device_id` and checks it can safely name a file.
pub fn checked_screen_id(device_id: &str) -> Result<String> {
    let screen_id = normalize_screen_id(device_id);
    let unsafe_name = screen_id.is_empty()
        || screen_id == "."
        || screen_id == ".."
        || screen_id.contains(['/', '\\', '\0']);
    if unsafe_name {
        return Err(TrmnlError::InvalidScreenId(device_id.to_string()));
    }
    Ok(screen_id)
}

/// Result of a successful upload, serialized as the upload response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUpload {
    pub id: String,
    pub path: String,
}

/// Image bytes read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub screen_id: String,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl StoredImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// # Image Store
///
/// Owns the files under the data root. Shared across handlers via `Arc`.
#[derive(Debug)]
pub struct ImageStore {
    root: PathBuf,
    /// One lock per screen id, created on first upload.
    upload_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            upload_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the data root if needed and returns a store over it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).await?;
        info!(data_root = %store.root.display(), "Image store ready");
        Ok(store)
    }

    pub fn file_path(&self, screen_id: &str, format: ImageFormat) -> PathBuf {
        self.root
            .join(format!("{}.{}", screen_id, format.extension()))
    }

    async fn upload_lock(&self, screen_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.upload_locks.lock().await;
        Arc::clone(locks.entry(screen_id.to_string()).or_default())
    }

    /// Stores an uploaded image for `device_id` and points its registry
    /// record at it.
    ///
    /// Rejects non-`image/*` content types before touching anything. Deletes
    /// the stale sibling file, overwrites the target, then updates the
    /// registry with the new path and `last_updated = now`.
    pub async fn store(
        &self,
        registry: &ScreenRegistry,
        device_id: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredUpload> {
        let format = ImageFormat::from_content_type(content_type)?;
        let screen_id = checked_screen_id(device_id)?;

        let lock = self.upload_lock(&screen_id).await;
        let _guard = lock.lock().await;

        let stale = self.file_path(&screen_id, format.sibling());
        match fs::remove_file(&stale).await {
            Ok(()) => debug!(path = %stale.display(), "Removed stale image"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let target = self.file_path(&screen_id, format);
        fs::write(&target, bytes).await?;

        let image_path = image_url_path(&screen_id, format);
        let record = registry
            .update(&screen_id, |old| old.with_image(image_path.as_str(), Utc::now()))
            .await;

        info!(
            screen_id = %record.id,
            path = %image_path,
            len = bytes.len(),
            "Stored image"
        );
        Ok(StoredUpload {
            id: record.id,
            path: image_path,
        })
    }

    /// Returns the stored image for `device_id`, checking `.jpg` then `.png`.
    pub async fn serve(&self, device_id: &str) -> Result<StoredImage> {
        let screen_id = checked_screen_id(device_id)
            .map_err(|_| TrmnlError::NotFound(device_id.to_string()))?;

        for format in ImageFormat::LOOKUP_ORDER {
            match fs::read(self.file_path(&screen_id, format)).await {
                Ok(bytes) => {
                    return Ok(StoredImage {
                        screen_id,
                        format,
                        bytes,
                    })
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TrmnlError::NotFound(screen_id))
    }

    /// Reads the `{id}.{ext}` file for exactly `format`, whatever else is on disk.
    pub async fn serve_as(&self, device_id: &str, format: ImageFormat) -> Result<StoredImage> {
        let screen_id = checked_screen_id(device_id)
            .map_err(|_| TrmnlError::NotFound(device_id.to_string()))?;

        match fs::read(self.file_path(&screen_id, format)).await {
            Ok(bytes) => Ok(StoredImage {
                screen_id,
                format,
                bytes,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TrmnlError::NotFound(format!(
                "{}.{}",
                screen_id,
                format.extension()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];
    const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_content_type_selects_extension() {
        let png = ImageFormat::from_content_type(Some("image/png")).unwrap();
        assert_eq!(png.extension(), "png");

        for ct in ["image/jpeg", "image/gif", "image/bmp", "IMAGE/WEBP"] {
            let format = ImageFormat::from_content_type(Some(ct)).unwrap();
            assert_eq!(format, ImageFormat::Jpeg, "{ct}");
        }
        assert_eq!(
            ImageFormat::from_content_type(None).unwrap(),
            ImageFormat::Jpeg
        );
        assert_eq!(
            ImageFormat::from_content_type(Some("Image/PNG; charset=binary")).unwrap(),
            ImageFormat::Png
        );
    }

    #[test]
    fn test_non_image_content_type_rejected() {
        for ct in ["text/plain", "application/octet-stream", "", "imagepng"] {
            let err = ImageFormat::from_content_type(Some(ct)).unwrap_err();
            assert!(matches!(err, TrmnlError::InvalidContentType(_)), "{ct}");
            assert!(err.is_client_error());
        }
    }

    #[test]
    fn test_checked_screen_id() {
        assert_eq!(checked_screen_id("AA:BB").unwrap(), "aa:bb");
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(
                matches!(checked_screen_id(bad), Err(TrmnlError::InvalidScreenId(_))),
                "{bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_store_then_serve_jpeg() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();
        let registry = ScreenRegistry::new();

        let upload = store
            .store(&registry, "AA:BB:CC", Some("image/jpeg"), JPEG_BYTES)
            .await
            .unwrap();
        assert_eq!(upload.id, "aa:bb:cc");
        assert_eq!(upload.path, "/screens/aa:bb:cc.jpg");
        assert!(dir.path().join("aa:bb:cc.jpg").is_file());

        let image = store.serve("aa:bb:cc").await.unwrap();
        assert_eq!(image.bytes, JPEG_BYTES);
        assert_eq!(image.mime_type(), "image/jpeg");

        let record = registry.get("aa:bb:cc").await.unwrap();
        assert_eq!(record.image_path.as_deref(), Some("/screens/aa:bb:cc.jpg"));
        assert!(record.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_png_upload_removes_stale_jpeg() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();
        let registry = ScreenRegistry::new();

        store
            .store(&registry, "dev", Some("image/jpeg"), JPEG_BYTES)
            .await
            .unwrap();
        store
            .store(&registry, "dev", Some("image/png"), PNG_BYTES)
            .await
            .unwrap();

        assert!(!dir.path().join("dev.jpg").exists());
        assert!(dir.path().join("dev.png").is_file());

        let image = store.serve("dev").await.unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!(image.bytes, PNG_BYTES);
        assert!(matches!(
            store.serve_as("dev", ImageFormat::Jpeg).await,
            Err(TrmnlError::NotFound(_))
        ));
        assert_eq!(
            registry.get("dev").await.unwrap().image_path.as_deref(),
            Some("/screens/dev.png")
        );
    }

    #[tokio::test]
    async fn test_rejected_upload_has_no_side_effect() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();
        let registry = ScreenRegistry::new();

        store
            .store(&registry, "dev", Some("image/jpeg"), JPEG_BYTES)
            .await
            .unwrap();
        let before = registry.get("dev").await;

        let err = store
            .store(&registry, "dev", Some("text/plain"), b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, TrmnlError::InvalidContentType(_)));

        assert_eq!(std::fs::read(dir.path().join("dev.jpg")).unwrap(), JPEG_BYTES);
        assert_eq!(registry.get("dev").await, before);
    }

    #[tokio::test]
    async fn test_failed_stale_delete_aborts_write() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();
        let registry = ScreenRegistry::new();

        // A directory where the stale jpg would be cannot be removed as a file.
        std::fs::create_dir(dir.path().join("dev.jpg")).unwrap();

        let err = store
            .store(&registry, "dev", Some("image/png"), PNG_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, TrmnlError::Io(_)));
        assert!(!err.is_client_error());
        assert!(!dir.path().join("dev.png").exists());
        assert!(registry.get("dev").await.is_none());
    }

    #[tokio::test]
    async fn test_serve_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();

        assert!(matches!(
            store.serve("nobody").await,
            Err(TrmnlError::NotFound(_))
        ));
        assert!(matches!(
            store.serve("../etc/passwd").await,
            Err(TrmnlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_serve_prefers_jpeg_and_ignores_registry() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();

        // Files placed out of band, never registered.
        std::fs::write(dir.path().join("dev.png"), PNG_BYTES).unwrap();
        std::fs::write(dir.path().join("dev.jpg"), JPEG_BYTES).unwrap();

        let image = store.serve("DEV").await.unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_serve_as_reads_requested_extension_with_stray_sibling() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();

        // Left over from a deployment that never cleaned up siblings.
        std::fs::write(dir.path().join("dev.png"), PNG_BYTES).unwrap();
        std::fs::write(dir.path().join("dev.jpg"), JPEG_BYTES).unwrap();

        let png = store.serve_as("dev", ImageFormat::Png).await.unwrap();
        assert_eq!(png.format, ImageFormat::Png);
        assert_eq!(png.bytes, PNG_BYTES);
        assert_eq!(png.mime_type(), "image/png");

        let jpg = store.serve_as("DEV", ImageFormat::Jpeg).await.unwrap();
        assert_eq!(jpg.bytes, JPEG_BYTES);
    }

    #[tokio::test]
    async fn test_serve_as_missing_or_unsafe_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("dev.jpg"), JPEG_BYTES).unwrap();

        assert!(matches!(
            store.serve_as("dev", ImageFormat::Png).await,
            Err(TrmnlError::NotFound(_))
        ));
        assert!(matches!(
            store.serve_as("..", ImageFormat::Jpeg).await,
            Err(TrmnlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_uploads_leave_single_file() {
        let dir = tempdir().unwrap();
        let store = Arc::new(ImageStore::open(dir.path()).await.unwrap());
        let registry = Arc::new(ScreenRegistry::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (ct, bytes) = if i % 2 == 0 {
                    ("image/jpeg", JPEG_BYTES)
                } else {
                    ("image/png", PNG_BYTES)
                };
                store.store(&registry, "dev", Some(ct), bytes).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let jpg = dir.path().join("dev.jpg").exists();
        let png = dir.path().join("dev.png").exists();
        assert!(jpg ^ png, "exactly one file expected (jpg={jpg}, png={png})");

        let image = store.serve("dev").await.unwrap();
        let record = registry.get("dev").await.unwrap();
        assert_eq!(
            record.image_path,
            Some(image_url_path("dev", image.format))
        );
    }
}
