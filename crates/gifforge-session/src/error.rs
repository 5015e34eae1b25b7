//! Error types for session operations.
//!
//! Variants are grouped by the boundary they are raised at: caller input,
//! session state, generation, storage and configuration. Render failures
//! are folded into this taxonomy by the `From<RenderError>` impl.

use std::path::PathBuf;

use gifforge_render::RenderError;

/// A specialized `Result` type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur while managing a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // ========================================================================
    // Session Identity
    // ========================================================================
    /// The session identifier is empty, too long or contains characters
    /// outside `[A-Za-z0-9_-]`.
    #[error("Invalid session id '{id}'\n\nSuggestion: Use 1-128 characters from A-Z, a-z, 0-9, '_' and '-'")]
    InvalidSessionId {
        /// The rejected identifier.
        id: String,
    },

    /// The session was reset and its identifier may not be used again.
    #[error("Session '{id}' has been closed\n\nSuggestion: Start a new session")]
    SessionClosed {
        /// The closed identifier.
        id: String,
    },

    // ========================================================================
    // Upload Errors
    // ========================================================================
    /// The file extension is not on the allow-list.
    #[error("Unsupported media type: '{name}'\n\nSuggestion: Upload png, jpg, jpeg, gif, bmp or tiff files")]
    UnsupportedMediaType {
        /// The rejected file name as supplied.
        name: String,
    },

    /// The file exceeds the configured upload limit.
    #[error("File '{name}' is {size} bytes, exceeding the {limit} byte limit")]
    PayloadTooLarge {
        /// The rejected file name as supplied.
        name: String,
        /// Size of the upload.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    // ========================================================================
    // Generation Input Errors
    // ========================================================================
    /// The resize parameter is malformed.
    #[error("Invalid resize format '{input}': expected WIDTHxHEIGHT with positive integers (e.g. 320x240)")]
    InvalidResizeFormat {
        /// The rejected input.
        input: String,
    },

    /// The frame duration cannot be stored in a GIF.
    #[error("Invalid frame duration {duration_ms}ms: must be at most {max_ms}ms")]
    InvalidDuration {
        /// The rejected duration.
        duration_ms: u32,
        /// The largest accepted duration.
        max_ms: u32,
    },

    // ========================================================================
    // Order Errors
    // ========================================================================
    /// A reorder request is not a permutation of the current order.
    #[error("Invalid order: {}", describe_order(.missing, .unexpected, .duplicated))]
    InvalidOrder {
        /// Current keys absent from the request.
        missing: Vec<String>,
        /// Requested keys that are not in the current order.
        unexpected: Vec<String>,
        /// Requested keys that appear more than once.
        duplicated: Vec<String>,
    },

    /// The image key does not exist in the session.
    #[error("Image not found: '{key}'")]
    NotFound {
        /// The missing key.
        key: String,
    },

    // ========================================================================
    // Generation Errors
    // ========================================================================
    /// None of the ordered images could be decoded.
    #[error("No valid frames: {skipped} image(s) could not be decoded\n\nSuggestion: Upload at least one readable image")]
    NoValidFrames {
        /// Number of entries that were skipped.
        skipped: usize,
    },

    /// Another generation is running for this session.
    #[error("A GIF is already being generated for session '{session}'\n\nSuggestion: Wait for it to finish and retry")]
    GenerationInFlight {
        /// The busy session.
        session: String,
    },

    /// The generation was abandoned or ran out of time.
    #[error("Generation cancelled: {reason}")]
    Cancelled {
        /// What stopped the generation.
        reason: String,
    },

    // ========================================================================
    // Fatal I/O
    // ========================================================================
    /// Blob or order storage failed.
    #[error("Storage failure: {message}")]
    StorageFailure {
        /// Description of the failure.
        message: String,
    },

    /// Encoding or publishing the artifact failed.
    #[error("GIF encoding failed: {message}")]
    EncodeFailure {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your gifforge.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // General Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_order(missing: &[String], unexpected: &[String], duplicated: &[String]) -> String {
    let parts: Vec<String> = [
        ("missing", missing),
        ("unexpected", unexpected),
        ("duplicated", duplicated),
    ]
    .into_iter()
    .filter(|(_, keys)| !keys.is_empty())
    .map(|(label, keys)| format!("{label} [{}]", keys.join(", ")))
    .collect();

    if parts.is_empty() {
        "not a permutation of the current order".to_string()
    } else {
        parts.join("; ")
    }
}

impl SessionError {
    /// Creates a new `InvalidSessionId` error.
    #[must_use]
    pub fn invalid_session_id(id: impl Into<String>) -> Self {
        Self::InvalidSessionId { id: id.into() }
    }

    /// Creates a new `SessionClosed` error.
    #[must_use]
    pub fn session_closed(id: impl Into<String>) -> Self {
        Self::SessionClosed { id: id.into() }
    }

    /// Creates a new `UnsupportedMediaType` error.
    #[must_use]
    pub fn unsupported_media_type(name: impl Into<String>) -> Self {
        Self::UnsupportedMediaType { name: name.into() }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `GenerationInFlight` error.
    #[must_use]
    pub fn generation_in_flight(session: impl Into<String>) -> Self {
        Self::GenerationInFlight {
            session: session.into(),
        }
    }

    /// Creates a new `StorageFailure` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure {
            message: message.into(),
        }
    }

    /// Creates a new `EncodeFailure` error.
    #[must_use]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::EncodeFailure {
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Returns `true` if the caller can fix the request and try again.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSessionId { .. }
                | Self::SessionClosed { .. }
                | Self::UnsupportedMediaType { .. }
                | Self::PayloadTooLarge { .. }
                | Self::InvalidResizeFormat { .. }
                | Self::InvalidDuration { .. }
                | Self::InvalidOrder { .. }
                | Self::NotFound { .. }
                | Self::NoValidFrames { .. }
        )
    }

    /// Returns `true` if the same request may succeed later unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationInFlight { .. })
    }

    /// Returns `true` if storage or encoding failed.
    #[must_use]
    pub const fn is_fatal_io(&self) -> bool {
        matches!(
            self,
            Self::StorageFailure { .. } | Self::EncodeFailure { .. } | Self::Io(_)
        )
    }
}

impl From<RenderError> for SessionError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::InvalidResizeFormat { input } => Self::InvalidResizeFormat { input },
            RenderError::InvalidDuration {
                duration_ms,
                max_ms,
            } => Self::InvalidDuration {
                duration_ms,
                max_ms,
            },
            RenderError::NoValidFrames { skipped } => Self::NoValidFrames { skipped },
            RenderError::Cancelled => Self::Cancelled {
                reason: "the request was abandoned".to_string(),
            },
            RenderError::DeadlineExceeded { timeout_secs } => Self::Cancelled {
                reason: format!("deadline of {timeout_secs}s exceeded"),
            },
            err @ (RenderError::Encode(_) | RenderError::Optimize { .. }) => {
                Self::encode(err.to_string())
            }
            err @ (RenderError::Artifact { .. } | RenderError::Io(_)) => {
                Self::storage(err.to_string())
            }
        }
    }
}
