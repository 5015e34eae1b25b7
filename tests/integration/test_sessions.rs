//! Session coordinator scenarios across concurrent callers.
//!
//! These tests drive `SessionCoordinator` directly with in-memory stores,
//! or with the filesystem layout built from `Config`, and check ordering,
//! isolation, single-flight generation, cancellation and artifact
//! publication.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gifforge_session::{
    BlobRepository, Config, CoordinatorSettings, GenerateRequest, GenerationState,
    InMemorySessionRegistry, MemoryBlobRepository, MemoryOrderStore, OptimizerConfig, Result,
    SessionCoordinator, SessionError, SessionId, StorageLayout, UploadFile,
};
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::time::{sleep, timeout, Instant};

/// Encodes a solid-color PNG.
fn png(color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(6, 4, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode fixture");
    out.into_inner()
}

fn id(name: &str) -> SessionId {
    SessionId::parse(name).expect("valid session id")
}

/// Memory blobs whose fetches take `delay` each.
#[derive(Default)]
struct SlowBlobs {
    inner: MemoryBlobRepository,
    delay: Duration,
    fetches: AtomicUsize,
}

#[async_trait]
impl BlobRepository for SlowBlobs {
    async fn store(&self, session: &SessionId, original_name: &str, bytes: Bytes) -> Result<String> {
        self.inner.store(session, original_name, bytes).await
    }

    async fn fetch(&self, session: &SessionId, key: &str) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        self.inner.fetch(session, key).await
    }

    async fn delete(&self, session: &SessionId, key: &str) -> Result<()> {
        self.inner.delete(session, key).await
    }

    async fn purge_session(&self, session: &SessionId) -> Result<()> {
        self.inner.purge_session(session).await
    }
}

struct Fixture {
    coordinator: Arc<SessionCoordinator>,
    blobs: Arc<SlowBlobs>,
    root: PathBuf,
    _dir: tempfile::TempDir,
}

impl Fixture {
    fn artifact(&self, session: &str) -> PathBuf {
        self.root.join(session).join("animation.gif")
    }
}

fn fixture(delay: Duration, settings: CoordinatorSettings) -> Fixture {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = dir.path().to_path_buf();
    let blobs = Arc::new(SlowBlobs {
        delay,
        ..SlowBlobs::default()
    });
    let coordinator = SessionCoordinator::new(
        Arc::new(InMemorySessionRegistry::new()),
        Arc::clone(&blobs) as Arc<dyn BlobRepository>,
        Arc::new(MemoryOrderStore::new()),
        StorageLayout::new(&root, "animation.gif"),
    )
    .with_settings(settings);

    Fixture {
        coordinator: Arc::new(coordinator),
        blobs,
        root,
        _dir: dir,
    }
}

async fn upload_frames(coordinator: &SessionCoordinator, session: &SessionId, count: usize) -> Vec<String> {
    let files = (0..count)
        .map(|i| {
            let shade = u8::try_from(i * 20 % 250).unwrap_or(0);
            UploadFile::new(format!("frame{i}.png"), png([shade, 0, 0, 255]))
        })
        .collect();
    coordinator
        .upload(session, files)
        .await
        .expect("Failed to upload")
}

/// Polls until the session reports `state`.
async fn wait_for_generation(coordinator: &SessionCoordinator, session: &SessionId, state: GenerationState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = coordinator.status(session).await.expect("Failed to get status");
        if status.generation == state {
            return;
        }
        assert!(Instant::now() < deadline, "session never reached {state}");
        sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Ordering and Isolation
// ============================================================================

/// Concurrent batches to one session all land, each batch contiguous.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_keep_batches_contiguous() {
    let fx = fixture(Duration::ZERO, CoordinatorSettings::default());
    let session = id("busy");

    let tasks: Vec<_> = (0..8)
        .map(|batch| {
            let coordinator = Arc::clone(&fx.coordinator);
            let session = session.clone();
            tokio::spawn(async move {
                let files = vec![
                    UploadFile::new(format!("b{batch}-first.png"), png([1, 2, 3, 255])),
                    UploadFile::new(format!("b{batch}-second.png"), png([4, 5, 6, 255])),
                ];
                coordinator.upload(&session, files).await
            })
        })
        .collect();

    let mut batches = Vec::new();
    for task in tasks {
        batches.push(task.await.expect("task panicked").expect("upload failed"));
    }

    let order = fx.coordinator.list(&session).await.expect("Failed to list");
    assert_eq!(order.len(), 16);
    for batch in batches {
        let pos = order
            .iter()
            .position(|k| *k == batch[0])
            .expect("batch key missing from order");
        assert_eq!(order[pos + 1], batch[1], "batch was interleaved");
    }
}

/// One session's keys are invisible to another.
#[tokio::test]
async fn test_sessions_are_isolated() {
    let fx = fixture(Duration::ZERO, CoordinatorSettings::default());
    let (alice, bob) = (id("alice"), id("bob"));

    let alice_keys = upload_frames(&fx.coordinator, &alice, 2).await;
    upload_frames(&fx.coordinator, &bob, 1).await;

    assert!(matches!(
        fx.coordinator.remove(&bob, &alice_keys[0]).await,
        Err(SessionError::NotFound { .. })
    ));
    assert!(matches!(
        fx.coordinator.reorder(&bob, &alice_keys).await,
        Err(SessionError::InvalidOrder { .. })
    ));
    assert_eq!(fx.coordinator.list(&alice).await.expect("list"), alice_keys);
    assert_eq!(fx.coordinator.list(&bob).await.expect("list").len(), 1);
}

// ============================================================================
// Generation
// ============================================================================

/// A second Generate on a busy session fails fast instead of queueing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_generation_in_flight() {
    let fx = fixture(Duration::from_millis(50), CoordinatorSettings::default());
    let session = id("single-flight");
    upload_frames(&fx.coordinator, &session, 6).await;

    let first = {
        let coordinator = Arc::clone(&fx.coordinator);
        let session = session.clone();
        tokio::spawn(async move { coordinator.generate(&session, GenerateRequest::default()).await })
    };
    wait_for_generation(&fx.coordinator, &session, GenerationState::Generating).await;

    let second = fx
        .coordinator
        .generate(&session, GenerateRequest::default())
        .await;
    assert!(matches!(second, Err(SessionError::GenerationInFlight { .. })));

    let artifact = first.await.expect("task panicked").expect("generate failed");
    assert_eq!(artifact.frame_count, 6);
    wait_for_generation(&fx.coordinator, &session, GenerationState::Idle).await;
}

/// Uploads made while a generation runs are accepted but not included.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generation_uses_snapshot_of_order() {
    let fx = fixture(Duration::from_millis(50), CoordinatorSettings::default());
    let session = id("snapshot");
    let before = upload_frames(&fx.coordinator, &session, 4).await;

    let generation = {
        let coordinator = Arc::clone(&fx.coordinator);
        let session = session.clone();
        tokio::spawn(async move { coordinator.generate(&session, GenerateRequest::default()).await })
    };
    wait_for_generation(&fx.coordinator, &session, GenerationState::Generating).await;

    let late = timeout(
        Duration::from_secs(1),
        fx.coordinator
            .upload(&session, vec![UploadFile::new("late.png", png([9, 9, 9, 255]))]),
    )
    .await
    .expect("upload blocked behind generation")
    .expect("upload failed");

    let artifact = generation.await.expect("task panicked").expect("generate failed");
    assert_eq!(artifact.frames, before);
    assert!(!artifact.frames.contains(&late[0]));

    let order = fx.coordinator.list(&session).await.expect("list");
    assert_eq!(order.len(), 5);
}

/// A busy session does not slow down other sessions.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generation_does_not_block_other_sessions() {
    let fx = fixture(Duration::from_millis(50), CoordinatorSettings::default());
    let (busy, idle) = (id("busy"), id("idle"));
    upload_frames(&fx.coordinator, &busy, 8).await;

    let generation = {
        let coordinator = Arc::clone(&fx.coordinator);
        let session = busy.clone();
        tokio::spawn(async move { coordinator.generate(&session, GenerateRequest::default()).await })
    };
    wait_for_generation(&fx.coordinator, &busy, GenerationState::Generating).await;

    timeout(Duration::from_secs(1), async {
        let keys = upload_frames(&fx.coordinator, &idle, 1).await;
        assert_eq!(fx.coordinator.list(&idle).await.expect("list"), keys);
    })
    .await
    .expect("other session was blocked");

    generation.await.expect("task panicked").expect("generate failed");
}

/// Reset cancels a running generation and leaves nothing behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reset_cancels_running_generation() {
    let fx = fixture(Duration::from_millis(100), CoordinatorSettings::default());
    let session = id("doomed");
    upload_frames(&fx.coordinator, &session, 20).await;

    let generation = {
        let coordinator = Arc::clone(&fx.coordinator);
        let session = session.clone();
        tokio::spawn(async move { coordinator.generate(&session, GenerateRequest::default()).await })
    };
    wait_for_generation(&fx.coordinator, &session, GenerationState::Generating).await;

    let fresh = fx.coordinator.reset(&session).await.expect("reset failed");
    assert_ne!(fresh, session);

    let result = generation.await.expect("task panicked");
    assert!(
        matches!(result, Err(SessionError::Cancelled { .. })),
        "expected cancellation, got {result:?}"
    );
    assert!(fx.blobs.fetches.load(Ordering::SeqCst) < 20);
    assert!(!fx.artifact("doomed").exists());
    assert!(!fx.root.join("doomed").exists());
    assert!(matches!(
        fx.coordinator.list(&session).await,
        Err(SessionError::SessionClosed { .. })
    ));
}

/// Dropping the caller's future stops the work and frees the session.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_generation_is_cancelled() {
    let fx = fixture(Duration::from_millis(100), CoordinatorSettings::default());
    let session = id("abandoned");
    upload_frames(&fx.coordinator, &session, 20).await;

    let generation = {
        let coordinator = Arc::clone(&fx.coordinator);
        let session = session.clone();
        tokio::spawn(async move { coordinator.generate(&session, GenerateRequest::default()).await })
    };
    wait_for_generation(&fx.coordinator, &session, GenerationState::Generating).await;

    generation.abort();
    wait_for_generation(&fx.coordinator, &session, GenerationState::Idle).await;

    assert!(fx.blobs.fetches.load(Ordering::SeqCst) < 20);
    assert!(!fx.artifact("abandoned").exists());
}

/// A generation past its deadline is cancelled.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generation_deadline() {
    let fx = fixture(
        Duration::from_millis(100),
        CoordinatorSettings {
            generate_timeout: Duration::from_millis(150),
            ..CoordinatorSettings::default()
        },
    );
    let session = id("slow");
    upload_frames(&fx.coordinator, &session, 10).await;

    let result = fx
        .coordinator
        .generate(&session, GenerateRequest::default())
        .await;
    assert!(matches!(result, Err(SessionError::Cancelled { .. })));
    assert!(!fx.artifact("slow").exists());
}

/// A failed generation leaves the previous artifact untouched.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_prior_artifact_survives_failed_generation() {
    let fx = fixture(Duration::ZERO, CoordinatorSettings::default());
    let session = id("keeper");
    let keys = upload_frames(&fx.coordinator, &session, 2).await;

    fx.coordinator
        .generate(&session, GenerateRequest::default())
        .await
        .expect("generate failed");
    let published = std::fs::read(fx.artifact("keeper")).expect("artifact missing");

    for key in &keys {
        fx.coordinator.remove(&session, key).await.expect("remove failed");
    }
    fx.coordinator
        .upload(&session, vec![UploadFile::new("broken.png", b"definitely not a png".to_vec())])
        .await
        .expect("upload failed");

    let result = fx
        .coordinator
        .generate(&session, GenerateRequest::default())
        .await;
    assert!(matches!(result, Err(SessionError::NoValidFrames { skipped: 1 })));
    assert_eq!(std::fs::read(fx.artifact("keeper")).expect("artifact missing"), published);
}

// ============================================================================
// Filesystem-backed Coordinator
// ============================================================================

/// The configured coordinator stores files on disk and publishes there.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_coordinator_from_config_round_trip() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = Config {
        storage_root: dir.path().display().to_string(),
        optimizer: OptimizerConfig {
            enabled: false,
            ..OptimizerConfig::default()
        },
        ..Config::default()
    };
    config.validate().expect("config should be valid");

    let coordinator = SessionCoordinator::from_config(&config)
        .await
        .expect("Failed to build coordinator");
    let session = coordinator.new_session().await.expect("Failed to mint session");

    let keys = coordinator
        .upload(
            &session,
            vec![
                UploadFile::new("my photo.png", png([255, 0, 0, 255])),
                UploadFile::new("../../etc/second.png", png([0, 255, 0, 255])),
            ],
        )
        .await
        .expect("upload failed");
    assert!(keys[0].ends_with("_my_photo.png"));
    assert!(keys[1].ends_with("_second.png"));

    let session_dir = dir.path().join(session.as_str());
    for key in &keys {
        assert!(session_dir.join(key).is_file(), "blob {key} missing on disk");
    }

    coordinator
        .reorder(&session, &[keys[1].clone(), keys[0].clone()])
        .await
        .expect("reorder failed");
    let artifact = coordinator
        .generate(
            &session,
            GenerateRequest {
                duration_ms: Some(120),
                loop_count: Some(3),
                resize: Some("12x8".to_string()),
            },
        )
        .await
        .expect("generate failed");

    assert_eq!(artifact.frames, vec![keys[1].clone(), keys[0].clone()]);
    assert_eq!((artifact.width, artifact.height), (12, 8));
    assert!(!artifact.optimized);
    assert_eq!(artifact.path, session_dir.join("animation.gif"));
    assert_eq!(
        artifact.url,
        format!("/uploads/{}/animation.gif", session.as_str())
    );

    let bytes = std::fs::read(&artifact.path).expect("artifact missing");
    assert!(bytes.starts_with(b"GIF89a"));
    assert_eq!(artifact.size_bytes, bytes.len() as u64);

    coordinator.reset(&session).await.expect("reset failed");
    assert!(!session_dir.exists());
}
