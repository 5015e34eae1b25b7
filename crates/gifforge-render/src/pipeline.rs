//! The full render: assemble → encode → optimize → publish.

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::encoder::{AnimationEncoder, AnimationSettings};
use crate::error::{RenderError, Result};
use crate::frames::{FrameSource, Frames, SkippedFrame};
use crate::optimize::Optimizer;
use crate::publish::{ArtifactSlot, TempArtifact};
use crate::resize::ResizeSpec;

/// Everything needed for one render.
#[derive(Debug)]
pub struct RenderRequest<S> {
    /// Where encoded frames come from.
    pub source: S,
    /// Keys in the order they should appear.
    pub keys: Vec<String>,
    /// Optional target size for every frame.
    pub resize: Option<ResizeSpec>,
    /// Timing and looping.
    pub settings: AnimationSettings,
    /// Destination of the published artifact.
    pub slot: ArtifactSlot,
    /// Cancellation observed between frames and before publishing.
    pub cancel: CancelToken,
}

/// Result of a successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    /// Published artifact path.
    pub path: PathBuf,
    /// Keys of the encoded frames, in order.
    pub frames: Vec<String>,
    /// Entries that could not be decoded.
    pub skipped: Vec<SkippedFrame>,
    /// Whether the optimizer's output was published.
    pub optimized: bool,
    /// Size of the published artifact.
    pub size_bytes: u64,
    /// Canvas width.
    pub width: u32,
    /// Canvas height.
    pub height: u32,
}

/// Renders and publishes one artifact.
///
/// On any error the slot keeps whatever it held before. An optimizer
/// failure is not an error: the unoptimized encoding is published instead.
pub fn render<S: FrameSource>(
    request: RenderRequest<S>,
    optimizer: &dyn Optimizer,
) -> Result<RenderOutcome> {
    let RenderRequest {
        source,
        keys,
        resize,
        settings,
        slot,
        cancel,
    } = request;
    let started = Instant::now();
    let requested = keys.len();

    let mut frames = Frames::new(source, keys, resize, cancel.clone());
    let (encoded, file) = slot.temp_file("encode")?;
    let mut writer = BufWriter::new(file);

    let summary = match AnimationEncoder::new(settings).encode(&mut frames, &mut writer) {
        Err(RenderError::NoValidFrames { .. }) => {
            return Err(RenderError::NoValidFrames {
                skipped: frames.skipped().len(),
            });
        }
        other => other?,
    };
    let report = frames.finish()?;

    writer
        .flush()
        .map_err(|e| RenderError::artifact(encoded.path(), e))?;
    let file = writer
        .into_inner()
        .map_err(|e| RenderError::artifact(encoded.path(), e.into_error()))?;
    file.sync_all()
        .map_err(|e| RenderError::artifact(encoded.path(), e))?;
    drop(file);

    debug!(
        frames = summary.frame_count(),
        bytes = encoded.size()?,
        "Encoded animation"
    );

    let optimized = if optimizer.enabled() {
        match optimized_copy(optimizer, &slot, &encoded) {
            Ok(copy) => Some(copy),
            Err(e) => {
                warn!(optimizer = optimizer.name(), error = %e, "Optimizer failed; publishing unoptimized artifact");
                None
            }
        }
    } else {
        None
    };
    let is_optimized = optimized.is_some();
    let chosen = optimized.unwrap_or(encoded);

    cancel.check()?;
    let size_bytes = chosen.size()?;
    let path = chosen.persist(&slot)?;

    info!(
        path = %path.display(),
        requested,
        frames = summary.frame_count(),
        skipped = report.skipped.len(),
        optimized = is_optimized,
        size_bytes,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Published animation"
    );

    Ok(RenderOutcome {
        path,
        frames: summary.keys,
        skipped: report.skipped,
        optimized: is_optimized,
        size_bytes,
        width: summary.width,
        height: summary.height,
    })
}

fn optimized_copy(
    optimizer: &dyn Optimizer,
    slot: &ArtifactSlot,
    encoded: &TempArtifact,
) -> Result<TempArtifact> {
    let (copy, file) = slot.temp_file("optimize")?;
    drop(file);
    optimizer.optimize(encoded.path(), copy.path())?;
    Ok(copy)
}
