//! Best-effort post-processing of encoded GIFs.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{RenderError, Result};

/// A size/quality pass over a finished GIF.
///
/// Implementations read `input` and write `output`; they must leave
/// `input` untouched so the caller can fall back to it.
pub trait Optimizer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the pass should run at all.
    fn enabled(&self) -> bool {
        true
    }

    /// Writes an optimized copy of `input` to `output`.
    fn optimize(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Optimizer that always declines; the unoptimized artifact is published.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOptimizer;

impl Optimizer for NoOptimizer {
    fn name(&self) -> &str {
        "none"
    }

    fn enabled(&self) -> bool {
        false
    }

    fn optimize(&self, _input: &Path, _output: &Path) -> Result<()> {
        Err(RenderError::optimize("none", "optimization disabled"))
    }
}

/// Runs the external `gifsicle` binary.
#[derive(Debug, Clone)]
pub struct Gifsicle {
    program: PathBuf,
    level: u8,
    colors: u16,
}

impl Default for Gifsicle {
    fn default() -> Self {
        Self::new("gifsicle", 3, 256)
    }
}

impl Gifsicle {
    /// Creates a gifsicle invocation; `level` is clamped to 1..=3 and
    /// `colors` to 2..=256.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, level: u8, colors: u16) -> Self {
        Self {
            program: program.into(),
            level: level.clamp(1, 3),
            colors: colors.clamp(2, 256),
        }
    }

    /// Command-line arguments for one run.
    fn args(&self, input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        vec![
            format!("--optimize={}", self.level).into(),
            "--colors".into(),
            self.colors.to_string().into(),
            input.as_os_str().to_owned(),
            "-o".into(),
            output.as_os_str().to_owned(),
        ]
    }
}

impl Optimizer for Gifsicle {
    fn name(&self) -> &str {
        "gifsicle"
    }

    fn optimize(&self, input: &Path, output: &Path) -> Result<()> {
        let program = self.program.display().to_string();
        debug!(program = %program, input = %input.display(), "Running optimizer");

        let result = Command::new(&self.program)
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| RenderError::optimize(&program, format!("failed to start: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(RenderError::optimize(
                &program,
                format!("exited with {}: {}", result.status, stderr.trim()),
            ));
        }

        let written = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(RenderError::optimize(&program, "produced no output"));
        }
        Ok(())
    }
}
