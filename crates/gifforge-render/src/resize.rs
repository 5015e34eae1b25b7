//! Parsing of `WIDTHxHEIGHT` resize parameters.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{RenderError, Result};

/// Largest dimension a GIF logical screen can describe.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

#[allow(clippy::expect_used)]
static RESIZE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)x(\d+)$").expect("valid resize regex"));

/// Target dimensions every frame is resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSpec {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
}

impl ResizeSpec {
    /// Creates a resize spec, rejecting zero or oversized dimensions.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(RenderError::invalid_resize(format!("{width}x{height}")));
        }
        Ok(Self { width, height })
    }

    /// Parses an optional resize parameter.
    ///
    /// `None` and blank strings mean "no resize".
    ///
    /// # Examples
    ///
    /// ```
    /// use gifforge_render::ResizeSpec;
    ///
    /// assert_eq!(ResizeSpec::parse_optional(None).unwrap(), None);
    /// assert_eq!(ResizeSpec::parse_optional(Some("")).unwrap(), None);
    /// let spec = ResizeSpec::parse_optional(Some("320x240")).unwrap().unwrap();
    /// assert_eq!((spec.width, spec.height), (320, 240));
    /// assert!(ResizeSpec::parse_optional(Some("abc")).is_err());
    /// ```
    pub fn parse_optional(input: Option<&str>) -> Result<Option<Self>> {
        match input {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }
}

impl FromStr for ResizeSpec {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        let captures = RESIZE_PATTERN
            .captures(s)
            .ok_or_else(|| RenderError::invalid_resize(s))?;

        // Digits-only captures can still overflow u32.
        let parse = |idx: usize| -> Result<u32> {
            captures[idx]
                .parse::<u32>()
                .map_err(|_| RenderError::invalid_resize(s))
        };

        let (width, height) = (parse(1)?, parse(2)?);
        Self::new(width, height).map_err(|_| RenderError::invalid_resize(s))
    }
}

impl fmt::Display for ResizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
