//! gifforge rendering
//!
//! Turns an ordered list of stored images into one animated GIF and
//! publishes it without ever exposing a partial file.

pub mod cancel;
pub mod encoder;
pub mod error;
pub mod frames;
pub mod optimize;
pub mod pipeline;
pub mod publish;
pub mod resize;

pub use cancel::CancelToken;
pub use encoder::{AnimationEncoder, AnimationSettings, EncodeSummary, DEFAULT_SPEED, MAX_DURATION_MS};
pub use error::{RenderError, Result};
pub use frames::{assemble, decode_frame, AssemblyReport, FrameBuffer, FrameSource, Frames, SkippedFrame};
pub use optimize::{Gifsicle, NoOptimizer, Optimizer};
pub use pipeline::{render, RenderOutcome, RenderRequest};
pub use publish::{ArtifactSlot, TempArtifact};
pub use resize::{ResizeSpec, MAX_DIMENSION};
