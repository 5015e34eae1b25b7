//! gifforge sessions
//!
//! Session-scoped ordered image collections, generation coordination and the
//! HTTP API in front of them.

pub mod api;
pub mod blob;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod order;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod registry;

pub use api::{
    create_router, ApiError, AppState, ErrorResponse, GenerateResponse, ImagesResponse,
    RemoveImageRequest, ReorderImagesRequest, SessionHeader, SessionResponse, SuccessResponse,
    UploadResponse, SESSION_HEADER, UPLOAD_FIELD,
};
pub use blob::{
    accept_upload_name, sanitize_filename, BlobRepository, FsBlobRepository, ImageFormat,
    MemoryBlobRepository, StorageLayout,
};
pub use config::{Config, OptimizerConfig, OrderStoreConfig};
pub use coordinator::{
    ArtifactHandle, CoordinatorSettings, FrameWarning, GenerateRequest, SessionCoordinator,
    SessionStatus, UploadFile,
};
pub use error::{Result, SessionError};
pub use order::{MemoryOrderStore, OrderStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisOrderStore;
pub use registry::{
    GenerationGuard, GenerationState, InMemorySessionRegistry, SessionHandle, SessionId,
    SessionRegistry,
};
