//! HTTP API endpoints for gifforge.
//!
//! Every endpoint except `POST /api/sessions` identifies the session through
//! the `X-Session-ID` header.
//!
//! # Endpoints
//!
//! - `POST /api/sessions` - Mint a fresh session
//! - `POST /api/upload` - Upload images (multipart, field `files`)
//! - `GET /api/images` - List the current order
//! - `POST /api/remove_image` - Remove one image
//! - `POST /api/reorder_images` - Replace the order with a permutation
//! - `POST /api/generate_gif` - Generate the session's GIF
//! - `GET /api/status` - Session status
//! - `POST /api/new_session` - Reset the session and return a fresh id
//! - `GET <publicUrlPrefix>/<session>/<file>` - Published artifacts
//!
//! # Example
//!
//! ```no_run
//! use gifforge_session::{create_router, AppState, Config, SessionCoordinator};
//! use std::sync::Arc;
//!
//! # async fn example() -> gifforge_session::Result<()> {
//! let config = Config::default();
//! let coordinator = SessionCoordinator::from_config(&config).await?;
//! let router = create_router(AppState::new(Arc::new(coordinator)));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, FromRequestParts,
        Multipart, State,
    },
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::coordinator::{FrameWarning, GenerateRequest, SessionCoordinator, SessionStatus, UploadFile};
use crate::error::SessionError;
use crate::registry::SessionId;

/// Header carrying the session identifier.
pub const SESSION_HEADER: &str = "x-session-id";

/// Multipart field holding uploaded files.
pub const UPLOAD_FIELD: &str = "files";

/// Most files one upload request may carry before the body limit applies.
const MAX_FILES_PER_UPLOAD: u64 = 32;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body carrying a session identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// The session to use from now on.
    pub session_id: SessionId,
}

/// Response body for the upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Always `true`.
    pub success: bool,
    /// Keys of the stored images, in upload order.
    pub filenames: Vec<String>,
}

/// Response body for the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesResponse {
    /// Current order.
    pub images: Vec<String>,
}

/// Request body for the remove endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveImageRequest {
    /// Key of the image to remove.
    pub image_name: String,
}

/// Request body for the reorder endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderImagesRequest {
    /// The new order.
    pub image_order: Vec<String>,
}

/// Response body for endpoints that only acknowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Always `true`.
    pub success: bool,
}

/// Response body for the generate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Always `true`.
    pub success: bool,
    /// Public URL of the artifact.
    pub gif_url: String,
    /// Number of frames encoded.
    pub frame_count: usize,
    /// Keys of the encoded frames, in order.
    pub frames: Vec<String>,
    /// Images that were skipped.
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

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The coordinator every handler delegates to.
    pub coordinator: Arc<SessionCoordinator>,
}

impl AppState {
    /// Creates a new `AppState` around a coordinator.
    #[must_use]
    pub const fn new(coordinator: Arc<SessionCoordinator>) -> Self {
        Self { coordinator }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error type returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// A session operation failed.
    Session(SessionError),
    /// The request itself could not be read.
    BadRequest {
        /// Status to answer with.
        status: StatusCode,
        /// Description of the problem.
        message: String,
    },
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

/// HTTP status for a session error.
const fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::InvalidSessionId { .. }
        | SessionError::InvalidResizeFormat { .. }
        | SessionError::InvalidDuration { .. }
        | SessionError::InvalidOrder { .. }
        | SessionError::NoValidFrames { .. } => StatusCode::BAD_REQUEST,
        SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
        SessionError::GenerationInFlight { .. } => StatusCode::CONFLICT,
        SessionError::SessionClosed { .. } => StatusCode::GONE,
        SessionError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        SessionError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        SessionError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::StorageFailure { .. }
        | SessionError::EncodeFailure { .. }
        | SessionError::ConfigParseError { .. }
        | SessionError::ConfigValidationError { .. }
        | SessionError::Io(_)
        | SessionError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Session(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!(error = %err, "Request failed");
                } else {
                    warn!(error = %err, "Request rejected");
                }
                (status, err.to_string())
            }
            Self::BadRequest { status, message } => {
                warn!(status = %status, error = %message, "Malformed request");
                (status, message)
            }
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Session Header
// ============================================================================

/// Reads the session id from the headers, if one was sent.
fn session_from_headers(headers: &HeaderMap) -> Result<Option<SessionId>, ApiError> {
    let Some(value) = headers.get(SESSION_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| SessionError::invalid_session_id("<non-ascii>"))?;
    Ok(Some(SessionId::parse(value)?))
}

/// Extractor for the required `X-Session-ID` header.
#[derive(Debug, Clone)]
pub struct SessionHeader(pub SessionId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionHeader {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        session_from_headers(&parts.headers)?
            .map(Self)
            .ok_or_else(|| ApiError::BadRequest {
                status: StatusCode::BAD_REQUEST,
                message: "missing X-Session-ID header".to_string(),
            })
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// Artifacts are served from the storage root under the configured public
/// URL prefix. The router carries request tracing and permissive CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let coordinator = &state.coordinator;
    let upload_limit = coordinator
        .settings()
        .max_upload_bytes
        .saturating_mul(MAX_FILES_PER_UPLOAD);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);
    let public_prefix = coordinator
        .settings()
        .public_url_prefix
        .trim_end_matches('/')
        .to_string();
    let artifacts = ServeDir::new(coordinator.layout().root());

    let api_routes = Router::new()
        .route("/sessions", post(handle_create_session))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/images", get(handle_list_images))
        .route("/remove_image", post(handle_remove_image))
        .route("/reorder_images", post(handle_reorder_images))
        .route("/generate_gif", post(handle_generate))
        .route("/status", get(handle_status))
        .route("/new_session", post(handle_new_session));

    Router::new()
        .nest("/api", api_routes)
        .nest_service(&public_prefix, artifacts)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/sessions`.
async fn handle_create_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = state.coordinator.new_session().await?;
    Ok(Json(SessionResponse { session_id }))
}

/// Handler for `POST /api/upload`.
///
/// Reads every `files` part before storing anything, so the batch is
/// accepted or rejected as a whole.
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    SessionHeader(session): SessionHeader,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        files.push(UploadFile::new(name, bytes));
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest {
            status: StatusCode::BAD_REQUEST,
            message: format!("no '{UPLOAD_FIELD}' parts in upload"),
        });
    }

    info!(session = %session, count = files.len(), "Received upload");
    let filenames = state.coordinator.upload(&session, files).await?;
    Ok(Json(UploadResponse {
        success: true,
        filenames,
    }))
}

/// Handler for `GET /api/images`.
async fn handle_list_images(
    State(state): State<Arc<AppState>>,
    SessionHeader(session): SessionHeader,
) -> Result<Json<ImagesResponse>, ApiError> {
    let images = state.coordinator.list(&session).await?;
    Ok(Json(ImagesResponse { images }))
}

/// Handler for `POST /api/remove_image`.
async fn handle_remove_image(
    State(state): State<Arc<AppState>>,
    SessionHeader(session): SessionHeader,
    request: Result<Json<RemoveImageRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(request) = request?;
    state.coordinator.remove(&session, &request.image_name).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Handler for `POST /api/reorder_images`.
async fn handle_reorder_images(
    State(state): State<Arc<AppState>>,
    SessionHeader(session): SessionHeader,
    request: Result<Json<ReorderImagesRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(request) = request?;
    state.coordinator.reorder(&session, &request.image_order).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Handler for `POST /api/generate_gif`.
///
/// An empty body generates with the configured defaults.
async fn handle_generate(
    State(state): State<Arc<AppState>>,
    SessionHeader(session): SessionHeader,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    let request: GenerateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        GenerateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest {
            status: StatusCode::BAD_REQUEST,
            message: format!("invalid generate request: {e}"),
        })?
    };

    let artifact = state.coordinator.generate(&session, request).await?;
    Ok(Json(GenerateResponse {
        success: true,
        gif_url: artifact.url,
        frame_count: artifact.frame_count,
        frames: artifact.frames,
        warnings: artifact.warnings,
        optimized: artifact.optimized,
        size_bytes: artifact.size_bytes,
        width: artifact.width,
        height: artifact.height,
        generated_at: artifact.generated_at,
    }))
}

/// Handler for `GET /api/status`.
async fn handle_status(
    State(state): State<Arc<AppState>>,
    SessionHeader(session): SessionHeader,
) -> Result<Json<SessionStatus>, ApiError> {
    Ok(Json(state.coordinator.status(&session).await?))
}

/// Handler for `POST /api/new_session`.
///
/// Resets the session named by the header, or just mints one when the
/// header is absent.
async fn handle_new_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = match session_from_headers(&headers)? {
        Some(session) => state.coordinator.reset(&session).await?,
        None => state.coordinator.new_session().await?,
    };
    Ok(Json(SessionResponse { session_id }))
}
