//! Error types for frame assembly and animation encoding.

use std::path::PathBuf;

/// A specialized `Result` type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Errors that can occur while turning an image order into an artifact.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    // ========================================================================
    // Input Validation
    // ========================================================================
    /// The resize parameter is not of the form `WIDTHxHEIGHT`.
    #[error("Invalid resize format '{input}': expected WIDTHxHEIGHT with positive integers (e.g. 320x240)")]
    InvalidResizeFormat {
        /// The rejected input.
        input: String,
    },

    /// The per-frame duration cannot be represented in a GIF.
    #[error("Invalid frame duration {duration_ms}ms: must be at most {max_ms}ms")]
    InvalidDuration {
        /// The rejected duration in milliseconds.
        duration_ms: u32,
        /// The largest accepted duration.
        max_ms: u32,
    },

    // ========================================================================
    // Partial Data
    // ========================================================================
    /// No frame could be decoded from the supplied order.
    #[error("No valid frames: {skipped} image(s) could not be decoded")]
    NoValidFrames {
        /// Number of entries that were skipped.
        skipped: usize,
    },

    // ========================================================================
    // Cancellation
    // ========================================================================
    /// The caller abandoned the generation.
    #[error("Generation cancelled")]
    Cancelled,

    /// The generation ran past its deadline.
    #[error("Generation exceeded its deadline of {timeout_secs}s")]
    DeadlineExceeded {
        /// Configured deadline in seconds.
        timeout_secs: u64,
    },

    // ========================================================================
    // Fatal I/O
    // ========================================================================
    /// The GIF encoder failed.
    #[error("GIF encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// The optimizer pass failed.
    #[error("Optimizer '{program}' failed: {message}")]
    Optimize {
        /// The optimizer program that was invoked.
        program: String,
        /// Description of the failure.
        message: String,
    },

    /// Writing or publishing the artifact failed.
    #[error("Artifact I/O failed for '{path}': {source}")]
    Artifact {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Creates a new `InvalidResizeFormat` error.
    #[must_use]
    pub fn invalid_resize(input: impl Into<String>) -> Self {
        Self::InvalidResizeFormat {
            input: input.into(),
        }
    }

    /// Creates a new `Optimize` error.
    #[must_use]
    pub fn optimize(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Optimize {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Artifact` error for the given path.
    #[must_use]
    pub fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Artifact {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the error was caused by caller input.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidResizeFormat { .. } | Self::InvalidDuration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_resize_message() {
        let err = RenderError::invalid_resize("abc");
        insta::assert_snapshot!(
            err.to_string(),
            @"Invalid resize format 'abc': expected WIDTHxHEIGHT with positive integers (e.g. 320x240)"
        );
    }

    #[test]
    fn test_no_valid_frames_message() {
        let err = RenderError::NoValidFrames { skipped: 3 };
        insta::assert_snapshot!(err.to_string(), @"No valid frames: 3 image(s) could not be decoded");
    }

    #[test]
    fn test_is_input_error() {
        assert!(RenderError::invalid_resize("x").is_input_error());
        assert!(RenderError::InvalidDuration {
            duration_ms: 1_000_000,
            max_ms: 655_350
        }
        .is_input_error());
        assert!(!RenderError::Cancelled.is_input_error());
        assert!(!RenderError::NoValidFrames { skipped: 0 }.is_input_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: RenderError = io_err.into();
        assert!(matches!(err, RenderError::Io(_)));
    }
}
