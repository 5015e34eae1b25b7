//! Per-session orchestration of uploads, ordering and GIF generation.
//!
//! Upload, Remove, Reorder and Reset are serialized per session by the
//! session's mutation lock. Generate holds that lock only long enough to
//! snapshot the order, then decodes and encodes on a blocking worker while
//! the session's generation guard keeps a second Generate out.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use gifforge_render::{
    render, AnimationSettings, CancelToken, FrameSource, NoOptimizer, Optimizer, RenderRequest,
    ResizeSpec,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::blob::{accept_upload_name, BlobRepository, FsBlobRepository, StorageLayout};
use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::order::{self, OrderStore};
use crate::registry::{
    GenerationState, InMemorySessionRegistry, SessionId, SessionRegistry, SessionState,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// One file of an upload batch.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Client-supplied file name.
    pub name: String,
    /// File contents.
    pub bytes: Bytes,
}

impl UploadFile {
    /// Creates an upload entry.
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Parameters of a Generate call; unset fields take configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Per-frame duration in milliseconds.
    #[serde(default, alias = "duration")]
    pub duration_ms: Option<u32>,
    /// Loop count, 0 loops forever.
    #[serde(default, alias = "loop")]
    pub loop_count: Option<u16>,
    /// Optional `WIDTHxHEIGHT` every frame is resized to.
    #[serde(default)]
    pub resize: Option<String>,
}

/// An image that was left out of the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameWarning {
    /// Key of the skipped image.
    pub key: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Description of a freshly published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHandle {
    /// Owning session.
    pub session_id: SessionId,
    /// Path of the artifact on disk.
    pub path: PathBuf,
    /// Public URL of the artifact.
    pub url: String,
    /// Number of frames encoded.
    pub frame_count: usize,
    /// Keys of the encoded frames, in order.
    pub frames: Vec<String>,
    /// Images that could not be decoded.
    pub warnings: Vec<FrameWarning>,
    /// Whether the optimizer's output was published.
    pub optimized: bool,
    /// Artifact size in bytes.
    pub size_bytes: u64,
    /// Canvas width.
    pub width: u32,
    /// Canvas height.
    pub height: u32,
    /// When the artifact was published.
    pub generated_at: DateTime<Utc>,
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// The session.
    pub session_id: SessionId,
    /// Whether a generation is running.
    pub generation: GenerationState,
    /// Number of images in the order.
    pub image_count: usize,
    /// Whether an artifact has been published.
    pub has_artifact: bool,
    /// Public URL of the artifact, when one exists.
    pub artifact_url: Option<String>,
}

// ============================================================================
// Settings
// ============================================================================

/// Tunables the coordinator applies to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Largest accepted upload per file.
    pub max_upload_bytes: u64,
    /// Deadline of one generation.
    pub generate_timeout: Duration,
    /// GIF quantizer speed.
    pub encoder_speed: i32,
    /// Duration used when a request has none.
    pub default_duration_ms: u32,
    /// Loop count used when a request has none.
    pub default_loop_count: u16,
    /// Prefix of artifact URLs.
    pub public_url_prefix: String,
}

impl CoordinatorSettings {
    /// Settings taken from the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            generate_timeout: config.generate_timeout(),
            encoder_speed: config.encoder_speed,
            default_duration_ms: config.default_duration_ms,
            default_loop_count: config.default_loop_count,
            public_url_prefix: config.public_url_prefix.clone(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// Blocking-side Frame Source
// ============================================================================

/// Fetches blobs for the render worker by blocking on the async repository.
struct BlobFrameSource {
    blobs: Arc<dyn BlobRepository>,
    session: SessionId,
    runtime: Handle,
}

impl FrameSource for BlobFrameSource {
    fn load(&self, key: &str) -> io::Result<Vec<u8>> {
        self.runtime
            .block_on(self.blobs.fetch(&self.session, key))
            .map(Vec::from)
            .map_err(|e| match e {
                SessionError::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
                other => io::Error::other(other.to_string()),
            })
    }
}

/// Cancels the generation if the awaiting caller goes away.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Entry point for every session operation.
pub struct SessionCoordinator {
    registry: Arc<dyn SessionRegistry>,
    blobs: Arc<dyn BlobRepository>,
    orders: Arc<dyn OrderStore>,
    optimizer: Arc<dyn Optimizer>,
    layout: StorageLayout,
    settings: CoordinatorSettings,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("optimizer", &self.optimizer.name())
            .field("layout", &self.layout)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// Creates a coordinator over the given stores, with no optimizer and
    /// default settings.
    #[must_use]
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        blobs: Arc<dyn BlobRepository>,
        orders: Arc<dyn OrderStore>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            registry,
            blobs,
            orders,
            optimizer: Arc::new(NoOptimizer),
            layout,
            settings: CoordinatorSettings::default(),
        }
    }

    /// Replaces the optimizer.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wires up filesystem blobs, the configured order store and optimizer.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let layout = StorageLayout::from_config(config);
        let blobs = Arc::new(FsBlobRepository::new(layout.clone()));
        let orders = order::connect(&config.order_store).await?;
        Ok(
            Self::new(Arc::new(InMemorySessionRegistry::new()), blobs, orders, layout)
                .with_optimizer(config.optimizer.build())
                .with_settings(CoordinatorSettings::from_config(config)),
        )
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Storage layout.
    #[must_use]
    pub const fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Public URL of a session's artifact.
    #[must_use]
    pub fn artifact_url(&self, session: &SessionId) -> String {
        format!(
            "{}/{}/{}",
            self.settings.public_url_prefix.trim_end_matches('/'),
            session,
            self.layout.artifact_name()
        )
    }

    /// Mints and registers a fresh session.
    pub async fn new_session(&self) -> Result<SessionId> {
        let id = SessionId::generate();
        self.registry.create(&id).await?;
        info!(session = %id, "Session started");
        Ok(id)
    }

    /// Stores a batch of images and appends them to the order.
    ///
    /// The batch is validated as a whole first: one unsupported or oversized
    /// file rejects everything. If a store fails midway, blobs already stored
    /// by this call are deleted again.
    pub async fn upload(&self, session: &SessionId, files: Vec<UploadFile>) -> Result<Vec<String>> {
        for file in &files {
            accept_upload_name(&file.name)?;
            let size = u64::try_from(file.bytes.len()).unwrap_or(u64::MAX);
            if size > self.settings.max_upload_bytes {
                return Err(SessionError::PayloadTooLarge {
                    name: file.name.clone(),
                    size,
                    limit: self.settings.max_upload_bytes,
                });
            }
        }

        let handle = self.registry.get_or_create(session).await?;
        let mut state = handle.lock().await?;
        self.reclaim_orphans(session, &mut state).await;

        if files.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(
            files
                .iter()
                .map(|file| self.blobs.store(session, &file.name, file.bytes.clone())),
        )
        .await;

        let mut stored = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(key) => stored.push(key),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(err) = failure {
            warn!(session = %session, error = %err, rolled_back = stored.len(), "Upload failed; rolling back");
            self.discard_blobs(session, &mut state, &stored).await;
            return Err(err);
        }

        if let Err(err) = self.orders.append(session, &stored).await {
            warn!(session = %session, error = %err, "Order append failed; rolling back");
            self.discard_blobs(session, &mut state, &stored).await;
            return Err(err);
        }

        info!(session = %session, count = stored.len(), "Uploaded images");
        Ok(stored)
    }

    /// Removes one image from the order and deletes its blob.
    ///
    /// A failed blob delete does not fail the call; the blob is queued and
    /// retried on the session's next mutation.
    pub async fn remove(&self, session: &SessionId, key: &str) -> Result<()> {
        let handle = self.registry.get_or_create(session).await?;
        let mut state = handle.lock().await?;
        self.reclaim_orphans(session, &mut state).await;

        self.orders.remove(session, key).await?;

        match self.blobs.delete(session, key).await {
            Ok(()) => {}
            Err(SessionError::NotFound { .. }) => {
                warn!(session = %session, key = %key, "Removed image had no blob");
            }
            Err(e) => {
                warn!(session = %session, key = %key, error = %e, "Blob delete failed; queued for reclamation");
                state.queue_orphan(key);
            }
        }

        info!(session = %session, key = %key, "Removed image");
        Ok(())
    }

    /// Replaces the order with a permutation of itself.
    pub async fn reorder(&self, session: &SessionId, keys: &[String]) -> Result<()> {
        let handle = self.registry.get_or_create(session).await?;
        let mut state = handle.lock().await?;
        self.reclaim_orphans(session, &mut state).await;

        self.orders.reorder(session, keys).await?;
        info!(session = %session, count = keys.len(), "Reordered images");
        Ok(())
    }

    /// Current order of the session.
    pub async fn list(&self, session: &SessionId) -> Result<Vec<String>> {
        self.registry.get_or_create(session).await?;
        self.orders.list(session).await
    }

    /// Builds and publishes the session's GIF from its current order.
    ///
    /// Fails with `GenerationInFlight` instead of waiting when another
    /// generation is running. The order is snapshotted once; uploads made
    /// after the snapshot are not part of this artifact.
    pub async fn generate(&self, session: &SessionId, request: GenerateRequest) -> Result<ArtifactHandle> {
        let resize = ResizeSpec::parse_optional(request.resize.as_deref())?;
        let settings = AnimationSettings::new(
            request.duration_ms.unwrap_or(self.settings.default_duration_ms),
            request.loop_count.unwrap_or(self.settings.default_loop_count),
        )?
        .with_speed(self.settings.encoder_speed);

        let handle = self.registry.get_or_create(session).await?;
        let guard = handle.try_begin_generation()?;
        let cancel = CancelToken::with_timeout(self.settings.generate_timeout);

        let keys = {
            let mut state = handle.lock().await?;
            state.set_active_generation(cancel.clone());
            self.orders.list(session).await?
        };
        if keys.is_empty() {
            return Err(SessionError::NoValidFrames { skipped: 0 });
        }
        debug!(session = %session, frames = keys.len(), "Snapshot taken");

        let render_request = RenderRequest {
            source: BlobFrameSource {
                blobs: Arc::clone(&self.blobs),
                session: session.clone(),
                runtime: Handle::current(),
            },
            keys,
            resize,
            settings,
            slot: self.layout.artifact_slot(session),
            cancel: cancel.clone(),
        };
        let optimizer = Arc::clone(&self.optimizer);
        let _abandon = CancelOnDrop(cancel);

        let outcome = tokio::task::spawn_blocking(move || {
            // Released only once the worker is done, even if the caller left.
            let _guard = guard;
            render(render_request, optimizer.as_ref())
        })
        .await
        .map_err(|e| {
            error!(session = %session, error = %e, "Generation worker failed");
            SessionError::encode(format!("generation worker failed: {e}"))
        })??;

        let artifact = ArtifactHandle {
            session_id: session.clone(),
            path: outcome.path,
            url: self.artifact_url(session),
            frame_count: outcome.frames.len(),
            frames: outcome.frames,
            warnings: outcome
                .skipped
                .into_iter()
                .map(|s| FrameWarning {
                    key: s.key,
                    reason: s.reason,
                })
                .collect(),
            optimized: outcome.optimized,
            size_bytes: outcome.size_bytes,
            width: outcome.width,
            height: outcome.height,
            generated_at: Utc::now(),
        };

        info!(
            session = %session,
            frames = artifact.frame_count,
            skipped = artifact.warnings.len(),
            optimized = artifact.optimized,
            size_bytes = artifact.size_bytes,
            "Generated GIF"
        );
        Ok(artifact)
    }

    /// Generation state, image count and artifact presence.
    pub async fn status(&self, session: &SessionId) -> Result<SessionStatus> {
        let handle = self.registry.get_or_create(session).await?;
        let image_count = self.orders.list(session).await?.len();
        let has_artifact = tokio::fs::try_exists(self.layout.artifact_slot(session).path())
            .await
            .unwrap_or(false);

        Ok(SessionStatus {
            session_id: session.clone(),
            generation: handle.generation_state(),
            image_count,
            has_artifact,
            artifact_url: has_artifact.then(|| self.artifact_url(session)),
        })
    }

    /// Destroys the session and everything it owns; returns a fresh id.
    ///
    /// A running generation is cancelled and waited for before storage is
    /// wiped. The old id is tombstoned.
    pub async fn reset(&self, session: &SessionId) -> Result<SessionId> {
        let handle = self.registry.get_or_create(session).await?;
        {
            let mut state = handle.lock().await?;
            state.close();
            let orphans = state.take_orphans();
            if !orphans.is_empty() {
                debug!(session = %session, count = orphans.len(), "Orphans swept by reset");
            }
        }
        self.registry.destroy(session).await?;
        handle.wait_idle().await;

        self.orders.clear(session).await?;
        self.blobs.purge_session(session).await?;
        let dir = self.layout.session_dir(session);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(session = %session, error = %e, "Failed to remove session directory");
                return Err(SessionError::storage(format!(
                    "cannot remove '{}': {e}",
                    dir.display()
                )));
            }
        }

        let fresh = self.new_session().await?;
        info!(old = %session, new = %fresh, "Session reset");
        Ok(fresh)
    }

    /// Deletes blobs that an earlier call could not delete.
    async fn reclaim_orphans(&self, session: &SessionId, state: &mut SessionState) {
        for key in state.take_orphans() {
            match self.blobs.delete(session, &key).await {
                Ok(()) | Err(SessionError::NotFound { .. }) => {
                    debug!(session = %session, key = %key, "Reclaimed orphaned blob");
                }
                Err(e) => {
                    warn!(session = %session, key = %key, error = %e, "Orphaned blob still not deletable");
                    state.queue_orphan(key);
                }
            }
        }
    }

    /// Deletes blobs stored by a failed batch.
    async fn discard_blobs(&self, session: &SessionId, state: &mut SessionState, keys: &[String]) {
        for key in keys {
            match self.blobs.delete(session, key).await {
                Ok(()) | Err(SessionError::NotFound { .. }) => {}
                Err(e) => {
                    warn!(session = %session, key = %key, error = %e, "Rollback delete failed; queued for reclamation");
                    state.queue_orphan(key.clone());
                }
            }
        }
    }
}
