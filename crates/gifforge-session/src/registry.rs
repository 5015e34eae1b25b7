//! Session identity, per-session locks and the single-flight generation guard.
//!
//! The registry hands out one [`SessionHandle`] per live session. A handle
//! owns the mutation lock that serializes Upload/Remove/Reorder/Reset and the
//! generation state that admits at most one Generate at a time. Destroyed
//! identifiers are tombstoned so they are never handed out again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gifforge_render::CancelToken;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::error::{Result, SessionError};

#[allow(clippy::expect_used)]
static SESSION_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid session id regex"));

// ============================================================================
// Session Identifier
// ============================================================================

/// Opaque, validated session identifier.
///
/// Identifiers double as directory names, so only `[A-Za-z0-9_-]` is
/// accepted, up to 128 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validates and wraps an identifier.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if SESSION_ID_PATTERN.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(SessionError::invalid_session_id(id))
        }
    }

    /// Mints a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ============================================================================
// Generation State
// ============================================================================

/// Whether a session is currently building its artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    /// No generation is running.
    #[default]
    Idle,
    /// A generation holds the session's guard.
    Generating,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Generating => write!(f, "generating"),
        }
    }
}

/// Proof that the holder is the session's only running generation.
///
/// Dropping the guard returns the session to [`GenerationState::Idle`],
/// whichever way the generation ended.
#[derive(Debug)]
pub struct GenerationGuard {
    handle: Arc<SessionHandle>,
}

impl GenerationGuard {
    /// The session this guard belongs to.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.handle.id
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.handle.generation.send_replace(GenerationState::Idle);
        debug!(session = %self.handle.id, "Generation guard released");
    }
}

// ============================================================================
// Session Handle
// ============================================================================

/// Mutable per-session bookkeeping, reachable only through the mutation lock.
#[derive(Debug, Default)]
pub struct SessionState {
    orphans: Vec<String>,
    active_generation: Option<CancelToken>,
    closed: bool,
}

impl SessionState {
    /// Records a blob whose order entry is gone but whose delete failed.
    pub fn queue_orphan(&mut self, key: impl Into<String>) {
        self.orphans.push(key.into());
    }

    /// Takes every queued orphan, leaving the queue empty.
    pub fn take_orphans(&mut self) -> Vec<String> {
        std::mem::take(&mut self.orphans)
    }

    /// Blobs waiting to be reclaimed.
    #[must_use]
    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    /// Registers the cancellation token of the running generation.
    pub fn set_active_generation(&mut self, token: CancelToken) {
        self.active_generation = Some(token);
    }

    /// Marks the session closed and cancels any running generation.
    pub fn close(&mut self) {
        self.closed = true;
        if let Some(token) = self.active_generation.take() {
            token.cancel();
        }
    }

    /// Returns `true` once the session has been reset.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Shared handle to one live session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    generation: watch::Sender<GenerationState>,
}

impl SessionHandle {
    /// Creates a handle for a brand-new session.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        let (generation, _) = watch::channel(GenerationState::Idle);
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::default()),
            generation,
        }
    }

    /// The session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// When the session was first referenced.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Acquires the mutation lock.
    ///
    /// Fails with `SessionClosed` if the session was reset while waiting.
    pub async fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        let guard = self.state.lock().await;
        if guard.is_closed() {
            return Err(SessionError::session_closed(self.id.as_str()));
        }
        Ok(guard)
    }

    /// Current generation state.
    #[must_use]
    pub fn generation_state(&self) -> GenerationState {
        *self.generation.borrow()
    }

    /// Moves the session from `Idle` to `Generating`.
    ///
    /// Fails fast with `GenerationInFlight` if a generation is already
    /// running; callers are never queued.
    pub fn try_begin_generation(self: &Arc<Self>) -> Result<GenerationGuard> {
        let acquired = self.generation.send_if_modified(|state| {
            if *state == GenerationState::Idle {
                *state = GenerationState::Generating;
                true
            } else {
                false
            }
        });

        if acquired {
            debug!(session = %self.id, "Generation guard acquired");
            Ok(GenerationGuard {
                handle: Arc::clone(self),
            })
        } else {
            Err(SessionError::generation_in_flight(self.id.as_str()))
        }
    }

    /// Waits until no generation is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.generation.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state == GenerationState::Idle).await;
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Lookup and lifecycle of session handles.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Returns the live handle for `id`, if any.
    ///
    /// Fails with `SessionClosed` for destroyed identifiers.
    async fn get(&self, id: &SessionId) -> Result<Option<Arc<SessionHandle>>>;

    /// Returns the handle for `id`, creating it if needed.
    ///
    /// Fails with `SessionClosed` for destroyed identifiers.
    async fn create(&self, id: &SessionId) -> Result<Arc<SessionHandle>>;

    /// Forgets `id` and tombstones it.
    async fn destroy(&self, id: &SessionId) -> Result<()>;

    /// Lazily creates the session on first reference.
    async fn get_or_create(&self, id: &SessionId) -> Result<Arc<SessionHandle>> {
        match self.get(id).await? {
            Some(handle) => Ok(handle),
            None => self.create(id).await,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    live: HashMap<SessionId, Arc<SessionHandle>>,
    tombstones: HashSet<SessionId>,
}

/// Process-local session registry.
#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemorySessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.live.len()
    }

    /// Returns `true` when no session is live.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.live.is_empty()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn get(&self, id: &SessionId) -> Result<Option<Arc<SessionHandle>>> {
        let inner = self.inner.read().await;
        if inner.tombstones.contains(id) {
            return Err(SessionError::session_closed(id.as_str()));
        }
        Ok(inner.live.get(id).cloned())
    }

    async fn create(&self, id: &SessionId) -> Result<Arc<SessionHandle>> {
        let mut inner = self.inner.write().await;
        if inner.tombstones.contains(id) {
            return Err(SessionError::session_closed(id.as_str()));
        }
        let handle = inner
            .live
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(session = %id, "Session created");
                Arc::new(SessionHandle::new(id.clone()))
            })
            .clone();
        Ok(handle)
    }

    async fn destroy(&self, id: &SessionId) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.live.remove(id);
        inner.tombstones.insert(id.clone());
        debug!(session = %id, "Session destroyed");
        Ok(())
    }
}
