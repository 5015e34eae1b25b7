//! Configuration types for the gifforge service.
//!
//! Configuration is read from `gifforge.json`. Every field has a default,
//! so an empty object or a missing file yields a working setup that stores
//! everything under `./uploads` and keeps image order in memory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gifforge_render::{Gifsicle, NoOptimizer, Optimizer, DEFAULT_SPEED, MAX_DURATION_MS};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "gifforge.json";

/// Default address the HTTP server binds to.
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default HTTP port.
const fn default_port() -> u16 {
    5000
}

/// Default root of the per-session directories.
fn default_storage_root() -> String {
    "uploads".to_string()
}

/// Default file name of the artifact slot.
fn default_artifact_name() -> String {
    "animation.gif".to_string()
}

/// Default prefix of published artifact URLs.
fn default_public_url_prefix() -> String {
    "/uploads".to_string()
}

/// Default per-frame duration in milliseconds.
const fn default_duration_ms() -> u32 {
    200
}

/// Default per-file upload limit (20 MiB).
const fn default_max_upload_bytes() -> u64 {
    20 * 1024 * 1024
}

/// Default generation deadline in seconds.
const fn default_generate_timeout_secs() -> u64 {
    120
}

/// Default GIF quantizer speed.
const fn default_encoder_speed() -> i32 {
    DEFAULT_SPEED
}

/// Default Redis key prefix.
fn default_redis_prefix() -> String {
    "gifforge:".to_string()
}

/// Default optimizer binary.
fn default_optimizer_binary() -> String {
    "gifsicle".to_string()
}

/// Default gifsicle optimization level.
const fn default_optimizer_level() -> u8 {
    3
}

/// Default palette size.
const fn default_optimizer_colors() -> u16 {
    256
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for the gifforge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory holding one sub-directory per session.
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// File name of the per-session artifact slot.
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,

    /// URL prefix under which session directories are served.
    #[serde(default = "default_public_url_prefix")]
    pub public_url_prefix: String,

    /// Frame duration used when a request does not supply one.
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u32,

    /// Loop count used when a request does not supply one (0 = forever).
    #[serde(default)]
    pub default_loop_count: u16,

    /// Largest accepted upload per file, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Deadline for a single generation, in seconds.
    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,

    /// GIF quantizer speed, 1 (best) to 30 (fastest).
    #[serde(default = "default_encoder_speed")]
    pub encoder_speed: i32,

    /// Where image order is kept.
    #[serde(default)]
    pub order_store: OrderStoreConfig,

    /// Post-encode optimization pass.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage_root: default_storage_root(),
            artifact_name: default_artifact_name(),
            public_url_prefix: default_public_url_prefix(),
            default_duration_ms: default_duration_ms(),
            default_loop_count: 0,
            max_upload_bytes: default_max_upload_bytes(),
            generate_timeout_secs: default_generate_timeout_secs(),
            encoder_speed: default_encoder_speed(),
            order_store: OrderStoreConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `gifforge.json` in the current directory and falls back to
    /// defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            SessionError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `gifforge.json` from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConfigParseError` if the file cannot be read or
    /// is not valid JSON, and `SessionError::ConfigValidationError` if a value
    /// is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(SessionError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SessionError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConfigValidationError` naming the first
    /// offending field.
    pub fn validate(&self) -> Result<()> {
        if self.storage_root.trim().is_empty() {
            return Err(SessionError::config_validation(
                "storageRoot must not be empty",
                "Provide a directory path in your gifforge.json (e.g. \"uploads\")",
            ));
        }

        if !is_plain_file_name(&self.artifact_name) {
            return Err(SessionError::config_validation(
                format!("artifactName '{}' must be a plain file name", self.artifact_name),
                "Use a name without path separators, such as \"animation.gif\"",
            ));
        }

        let prefix = self.public_url_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') || prefix.contains("//") {
            return Err(SessionError::config_validation(
                format!("publicUrlPrefix '{}' must be an absolute URL path", self.public_url_prefix),
                "Use a path such as \"/uploads\"",
            ));
        }

        if self.default_duration_ms > MAX_DURATION_MS {
            return Err(SessionError::config_validation(
                format!("defaultDurationMs must be at most {MAX_DURATION_MS}"),
                "Lower defaultDurationMs in your gifforge.json",
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(SessionError::config_validation(
                "maxUploadBytes must be greater than 0",
                "Set maxUploadBytes to at least 1 in your gifforge.json",
            ));
        }

        if self.generate_timeout_secs == 0 {
            return Err(SessionError::config_validation(
                "generateTimeoutSecs must be greater than 0",
                "Set generateTimeoutSecs to at least 1 second in your gifforge.json",
            ));
        }

        if !(1..=30).contains(&self.encoder_speed) {
            return Err(SessionError::config_validation(
                "encoderSpeed must be between 1 and 30",
                "Use 1 for best quality or 30 for fastest encoding",
            ));
        }

        if let OrderStoreConfig::Redis { url, .. } = &self.order_store {
            if url.trim().is_empty() {
                return Err(SessionError::config_validation(
                    "orderStore.url must not be empty for the redis backend",
                    "Set orderStore.url to e.g. \"redis://127.0.0.1:6379\"",
                ));
            }
        }

        self.optimizer.validate()
    }

    /// Generation deadline as a `Duration`.
    #[must_use]
    pub const fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
}

/// Backend holding the authoritative image order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum OrderStoreConfig {
    /// Process-local map (default).
    #[default]
    Memory,
    /// Redis lists, one per session.
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379`.
        url: String,
        /// Prefix prepended to every key.
        #[serde(default = "default_redis_prefix")]
        prefix: String,
    },
}

/// Settings for the best-effort optimization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Whether to run the optimizer at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Program to invoke.
    #[serde(default = "default_optimizer_binary")]
    pub binary: String,

    /// gifsicle `--optimize` level, 1-3.
    #[serde(default = "default_optimizer_level")]
    pub level: u8,

    /// Palette size passed to `--colors`, 2-256.
    #[serde(default = "default_optimizer_colors")]
    pub colors: u16,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            binary: default_optimizer_binary(),
            level: default_optimizer_level(),
            colors: default_optimizer_colors(),
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.binary.trim().is_empty() {
            return Err(SessionError::config_validation(
                "optimizer.binary must not be empty",
                "Set optimizer.binary to \"gifsicle\" or disable the optimizer",
            ));
        }

        if !(1..=3).contains(&self.level) {
            return Err(SessionError::config_validation(
                "optimizer.level must be between 1 and 3",
                "Use optimizer.level 3 for the smallest output",
            ));
        }

        if !(2..=256).contains(&self.colors) {
            return Err(SessionError::config_validation(
                "optimizer.colors must be between 2 and 256",
                "Use optimizer.colors 256 to keep the full palette",
            ));
        }

        Ok(())
    }

    /// Builds the optimizer these settings describe.
    #[must_use]
    pub fn build(&self) -> Arc<dyn Optimizer> {
        if self.enabled {
            Arc::new(Gifsicle::new(&self.binary, self.level, self.colors))
        } else {
            Arc::new(NoOptimizer)
        }
    }
}
