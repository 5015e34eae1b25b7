//! Storage of uploaded image bytes.
//!
//! Blobs are addressed by keys of the form
//! `IMG_<unix-millis>_<8 hex>_<sanitized name>`. Keys are generated by the
//! repository and never reused; a store that would overwrite an existing
//! blob picks a new key instead.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use gifforge_render::ArtifactSlot;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::registry::SessionId;

/// How many fresh keys a store tries before giving up.
pub const MAX_KEY_ATTEMPTS: usize = 5;

#[allow(clippy::expect_used)]
static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^IMG_\d+_[0-9a-f]{8}_[A-Za-z0-9._-]+$").expect("valid image key regex")
});

// ============================================================================
// Accepted Formats
// ============================================================================

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG image format.
    Png,
    /// JPEG image format.
    Jpeg,
    /// GIF image format.
    Gif,
    /// BMP image format.
    Bmp,
    /// TIFF image format.
    Tiff,
}

impl ImageFormat {
    /// Maps a file extension onto the allow-list, case-insensitively.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Detects the format from a file name's extension.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Gif => write!(f, "gif"),
            Self::Bmp => write!(f, "bmp"),
            Self::Tiff => write!(f, "tiff"),
        }
    }
}

// ============================================================================
// Names and Keys
// ============================================================================

/// Reduces a client-supplied file name to a safe ASCII name.
///
/// Only the last path component survives. Non-ASCII and control characters
/// are dropped, runs of whitespace become `_`, anything outside
/// `[A-Za-z0-9._-]` is removed, and leading or trailing `.`/`_` are
/// stripped. The result may be empty.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let ascii: String = last
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect();
    let joined = ascii.split_ascii_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    filtered.trim_matches(['.', '_']).to_string()
}

/// Sanitizes `name` and checks it against the format allow-list.
pub fn accept_upload_name(name: &str) -> Result<(String, ImageFormat)> {
    let sanitized = sanitize_filename(name);
    if sanitized.is_empty() {
        return Err(SessionError::unsupported_media_type(name));
    }
    let format = ImageFormat::from_name(&sanitized)
        .ok_or_else(|| SessionError::unsupported_media_type(name))?;
    Ok((sanitized, format))
}

/// Builds a fresh key for an already sanitized name.
#[must_use]
pub fn generate_key(sanitized_name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("IMG_{millis}_{}_{sanitized_name}", &token[..8])
}

/// Returns `true` if `key` has the shape of a generated key.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}

// ============================================================================
// Layout
// ============================================================================

/// On-disk layout: `<root>/<session>/` holds blobs and the artifact slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    artifact_name: String,
}

impl StorageLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, artifact_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            artifact_name: artifact_name.into(),
        }
    }

    /// Layout described by the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage_root, &config.artifact_name)
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name of the artifact slot.
    #[must_use]
    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    /// Directory owned by `session`.
    #[must_use]
    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }

    /// Path of one blob.
    #[must_use]
    pub fn blob_path(&self, session: &SessionId, key: &str) -> PathBuf {
        self.session_dir(session).join(key)
    }

    /// The session's artifact slot.
    #[must_use]
    pub fn artifact_slot(&self, session: &SessionId) -> ArtifactSlot {
        ArtifactSlot::new(self.session_dir(session), &self.artifact_name)
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Keyed storage of uploaded image bytes.
#[async_trait]
pub trait BlobRepository: Send + Sync {
    /// Stores `bytes` under a fresh key derived from `original_name`.
    ///
    /// Fails with `UnsupportedMediaType` if the name is not allowed.
    async fn store(&self, session: &SessionId, original_name: &str, bytes: Bytes) -> Result<String>;

    /// Loads a blob; `NotFound` if it does not exist.
    async fn fetch(&self, session: &SessionId, key: &str) -> Result<Bytes>;

    /// Deletes a blob; `NotFound` if it does not exist.
    async fn delete(&self, session: &SessionId, key: &str) -> Result<()>;

    /// Removes every blob of the session, including orphans.
    async fn purge_session(&self, session: &SessionId) -> Result<()>;
}

/// Blobs stored as files under a [`StorageLayout`].
#[derive(Debug, Clone)]
pub struct FsBlobRepository {
    layout: StorageLayout,
}

impl FsBlobRepository {
    /// Creates a repository writing into `layout`.
    #[must_use]
    pub const fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// The layout this repository writes into.
    #[must_use]
    pub const fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    async fn store_with_keys<I>(&self, dir: &Path, bytes: &[u8], keys: I) -> Result<String>
    where
        I: IntoIterator<Item = String> + Send,
        I::IntoIter: Send,
    {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SessionError::storage(format!("cannot create '{}': {e}", dir.display())))?;

        for key in keys {
            let path = dir.join(&key);
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(key = %key, "Key collision, retrying");
                    continue;
                }
                Err(e) => {
                    return Err(SessionError::storage(format!(
                        "cannot create '{}': {e}",
                        path.display()
                    )));
                }
            };

            let written = async {
                file.write_all(bytes).await?;
                file.sync_all().await
            }
            .await;

            if let Err(e) = written {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %cleanup, "Failed to remove partial blob");
                }
                return Err(SessionError::storage(format!(
                    "cannot write '{}': {e}",
                    path.display()
                )));
            }
            return Ok(key);
        }

        Err(SessionError::storage(format!(
            "no unique key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }
}

#[async_trait]
impl BlobRepository for FsBlobRepository {
    async fn store(&self, session: &SessionId, original_name: &str, bytes: Bytes) -> Result<String> {
        let (sanitized, _) = accept_upload_name(original_name)?;
        let keys: Vec<String> = (0..MAX_KEY_ATTEMPTS).map(|_| generate_key(&sanitized)).collect();
        let key = self
            .store_with_keys(&self.layout.session_dir(session), &bytes, keys)
            .await?;
        debug!(session = %session, key = %key, bytes = bytes.len(), "Stored blob");
        Ok(key)
    }

    async fn fetch(&self, session: &SessionId, key: &str) -> Result<Bytes> {
        if !is_valid_key(key) {
            return Err(SessionError::not_found(key));
        }
        match tokio::fs::read(self.layout.blob_path(session, key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SessionError::not_found(key)),
            Err(e) => Err(SessionError::storage(format!("cannot read '{key}': {e}"))),
        }
    }

    async fn delete(&self, session: &SessionId, key: &str) -> Result<()> {
        if !is_valid_key(key) {
            return Err(SessionError::not_found(key));
        }
        match tokio::fs::remove_file(self.layout.blob_path(session, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SessionError::not_found(key)),
            Err(e) => Err(SessionError::storage(format!("cannot delete '{key}': {e}"))),
        }
    }

    async fn purge_session(&self, session: &SessionId) -> Result<()> {
        let dir = self.layout.session_dir(session);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::storage(format!(
                "cannot purge '{}': {e}",
                dir.display()
            ))),
        }
    }
}

/// Blobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryBlobRepository {
    blobs: RwLock<HashMap<SessionId, HashMap<String, Bytes>>>,
}

impl MemoryBlobRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored for `session`, sorted.
    pub async fn keys(&self, session: &SessionId) -> Vec<String> {
        let blobs = self.blobs.read().await;
        let mut keys: Vec<String> = blobs
            .get(session)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobRepository for MemoryBlobRepository {
    async fn store(&self, session: &SessionId, original_name: &str, bytes: Bytes) -> Result<String> {
        let (sanitized, _) = accept_upload_name(original_name)?;
        let mut blobs = self.blobs.write().await;
        let entries = blobs.entry(session.clone()).or_default();
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = generate_key(&sanitized);
            if let std::collections::hash_map::Entry::Vacant(slot) = entries.entry(key.clone()) {
                slot.insert(bytes);
                return Ok(key);
            }
        }
        Err(SessionError::storage(format!(
            "no unique key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }

    async fn fetch(&self, session: &SessionId, key: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(session)
            .and_then(|m| m.get(key))
            .cloned()
            .ok_or_else(|| SessionError::not_found(key))
    }

    async fn delete(&self, session: &SessionId, key: &str) -> Result<()> {
        self.blobs
            .write()
            .await
            .get_mut(session)
            .and_then(|m| m.remove(key))
            .map(|_| ())
            .ok_or_else(|| SessionError::not_found(key))
    }

    async fn purge_session(&self, session: &SessionId) -> Result<()> {
        self.blobs.write().await.remove(session);
        Ok(())
    }
}
