//! Animated GIF encoding.

use std::io::Write;

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, Frame};
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::frames::FrameBuffer;

/// Largest per-frame duration a GIF can store (65535 centiseconds).
pub const MAX_DURATION_MS: u32 = 655_350;

/// Default quantizer speed; 1 is best quality, 30 is fastest.
pub const DEFAULT_SPEED: i32 = 10;

/// Timing and looping parameters for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationSettings {
    /// Display time of every frame in milliseconds.
    pub duration_ms: u32,
    /// Number of loops; 0 loops forever.
    pub loop_count: u16,
    /// NeuQuant sampling speed, 1..=30.
    pub speed: i32,
}

impl AnimationSettings {
    /// Creates settings after checking the duration fits a GIF delay.
    pub fn new(duration_ms: u32, loop_count: u16) -> Result<Self> {
        if duration_ms > MAX_DURATION_MS {
            return Err(RenderError::InvalidDuration {
                duration_ms,
                max_ms: MAX_DURATION_MS,
            });
        }
        Ok(Self {
            duration_ms,
            loop_count,
            speed: DEFAULT_SPEED,
        })
    }

    /// Overrides the quantizer speed, clamped to 1..=30.
    #[must_use]
    pub fn with_speed(mut self, speed: i32) -> Self {
        self.speed = speed.clamp(1, 30);
        self
    }

    /// The NETSCAPE2.0 repetition value for these settings.
    #[must_use]
    pub const fn repeat(&self) -> Repeat {
        match self.loop_count {
            0 => Repeat::Infinite,
            n => Repeat::Finite(n),
        }
    }
}

/// What the encoder wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Keys of the encoded frames, in output order.
    pub keys: Vec<String>,
    /// Logical screen width.
    pub width: u32,
    /// Logical screen height.
    pub height: u32,
}

impl EncodeSummary {
    /// Number of frames written.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.keys.len()
    }
}

/// Encodes frame sequences into animated GIFs.
#[derive(Debug, Clone, Copy)]
pub struct AnimationEncoder {
    settings: AnimationSettings,
}

impl AnimationEncoder {
    /// Creates an encoder with the given settings.
    #[must_use]
    pub const fn new(settings: AnimationSettings) -> Self {
        Self { settings }
    }

    /// The settings this encoder writes.
    #[must_use]
    pub const fn settings(&self) -> &AnimationSettings {
        &self.settings
    }

    /// Consumes `frames` in order and writes one GIF to `writer`.
    ///
    /// The first frame fixes the canvas; later frames of a different size
    /// are scaled to it. Nothing is written when the sequence is empty, and
    /// the call fails with `NoValidFrames`.
    pub fn encode<W, I>(&self, frames: I, writer: W) -> Result<EncodeSummary>
    where
        W: Write,
        I: IntoIterator<Item = Result<FrameBuffer>>,
    {
        let mut encoder = GifEncoder::new_with_speed(writer, self.settings.speed);
        encoder.set_repeat(self.settings.repeat())?;

        let delay = Delay::from_numer_denom_ms(self.settings.duration_ms, 1);
        let mut canvas: Option<(u32, u32)> = None;
        let mut keys = Vec::new();

        for frame in frames {
            let FrameBuffer { key, image } = frame?;
            let (width, height) = *canvas.get_or_insert_with(|| image.dimensions());

            let image = if image.dimensions() == (width, height) {
                image
            } else {
                debug!(key = %key, from = ?image.dimensions(), to = ?(width, height), "Fitting frame to canvas");
                imageops::resize(&image, width, height, FilterType::Lanczos3)
            };

            encoder.encode_frame(Frame::from_parts(image, 0, 0, delay))?;
            keys.push(key);
        }

        let Some((width, height)) = canvas else {
            return Err(RenderError::NoValidFrames { skipped: 0 });
        };

        Ok(EncodeSummary {
            keys,
            width,
            height,
        })
    }
}
