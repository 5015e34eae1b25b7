//! Lazy decoding of an image order into normalized frames.
//!
//! [`Frames`] walks the supplied keys exactly once and in order. Each key is
//! fetched from a [`FrameSource`], decoded, rotated according to its EXIF
//! orientation and optionally resized. Entries that cannot be fetched or
//! decoded are skipped and recorded; they never abort the sequence.

use std::collections::HashMap;
use std::io::{self, Cursor};

use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbaImage};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{RenderError, Result};
use crate::resize::ResizeSpec;

/// Supplies the encoded bytes for a key.
///
/// Implementations are called from a blocking worker, one key at a time.
pub trait FrameSource {
    /// Loads the encoded image stored under `key`.
    fn load(&self, key: &str) -> io::Result<Vec<u8>>;
}

impl FrameSource for HashMap<String, Vec<u8>> {
    fn load(&self, key: &str) -> io::Result<Vec<u8>> {
        self.get(key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no blob for '{key}'")))
    }
}

/// A decoded, orientation-corrected frame.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Key the frame was decoded from.
    pub key: String,
    /// RGBA pixels.
    pub image: RgbaImage,
}

/// An entry that was dropped from the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFrame {
    /// Key of the dropped entry.
    pub key: String,
    /// Why it was dropped.
    pub reason: String,
}

/// Outcome of walking the whole key sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Number of frames produced.
    pub produced: usize,
    /// Entries that were skipped, in order.
    pub skipped: Vec<SkippedFrame>,
}

/// Decodes encoded bytes into an upright RGBA buffer.
pub fn decode_frame(bytes: &[u8], resize: Option<ResizeSpec>) -> image::ImageResult<RgbaImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    if let Some(spec) = resize {
        img = img.resize_exact(spec.width, spec.height, FilterType::Lanczos3);
    }

    Ok(img.to_rgba8())
}

/// Parses the resize parameter and starts a lazy frame sequence.
///
/// A malformed resize fails here, before any key is fetched.
pub fn assemble<S: FrameSource>(
    source: S,
    keys: Vec<String>,
    resize: Option<&str>,
    cancel: CancelToken,
) -> Result<Frames<S>> {
    let resize = ResizeSpec::parse_optional(resize)?;
    Ok(Frames::new(source, keys, resize, cancel))
}

/// Finite, non-restartable sequence of frames.
///
/// Yields `Ok` for each decodable key. The only `Err` it yields is a
/// cancellation, after which the sequence is exhausted.
pub struct Frames<S> {
    source: S,
    keys: std::vec::IntoIter<String>,
    resize: Option<ResizeSpec>,
    cancel: CancelToken,
    report: AssemblyReport,
    halted: bool,
}

impl<S: FrameSource> Frames<S> {
    /// Creates a sequence over `keys` in the given order.
    pub fn new(
        source: S,
        keys: Vec<String>,
        resize: Option<ResizeSpec>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            keys: keys.into_iter(),
            resize,
            cancel,
            report: AssemblyReport::default(),
            halted: false,
        }
    }

    /// Frames produced so far.
    #[must_use]
    pub const fn produced(&self) -> usize {
        self.report.produced
    }

    /// Entries skipped so far.
    #[must_use]
    pub fn skipped(&self) -> &[SkippedFrame] {
        &self.report.skipped
    }

    /// Drains any remaining keys and returns the report.
    ///
    /// Fails with `NoValidFrames` when nothing could be decoded.
    pub fn finish(mut self) -> Result<AssemblyReport> {
        for item in self.by_ref() {
            item?;
        }
        if self.report.produced == 0 {
            return Err(RenderError::NoValidFrames {
                skipped: self.report.skipped.len(),
            });
        }
        Ok(self.report)
    }

    fn load_frame(&self, key: &str) -> std::result::Result<RgbaImage, String> {
        let bytes = self
            .source
            .load(key)
            .map_err(|e| format!("fetch failed: {e}"))?;
        decode_frame(&bytes, self.resize).map_err(|e| format!("decode failed: {e}"))
    }
}

impl<S: FrameSource> Iterator for Frames<S> {
    type Item = Result<FrameBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        loop {
            if let Err(e) = self.cancel.check() {
                self.halted = true;
                return Some(Err(e));
            }

            let key = self.keys.next()?;
            match self.load_frame(&key) {
                Ok(image) => {
                    self.report.produced += 1;
                    debug!(
                        key = %key,
                        width = image.width(),
                        height = image.height(),
                        "Decoded frame"
                    );
                    return Some(Ok(FrameBuffer { key, image }));
                }
                Err(reason) => {
                    warn!(key = %key, reason = %reason, "Skipping unreadable frame");
                    self.report.skipped.push(SkippedFrame { key, reason });
                }
            }
        }
    }
}
