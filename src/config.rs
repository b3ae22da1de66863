//! Builder configuration module.
//!
//! Handles loading, validating, and merging `builder.toml` files. Configuration
//! is layered: stock defaults are overridden by the config file, which is in
//! turn overridden by environment variables for deployment-specific values
//! (credentials, endpoint, bucket).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional except storage.bucket (for the s3 provider)
//! # and storage.root (for the git provider).
//!
//! [storage]
//! provider = "s3"           # "s3" | "git" | "memory"
//! bucket = "my-photos"      # Required for s3
//! region = "us-east-1"
//! endpoint = ""             # Custom endpoint for S3-compatible stores (MinIO, R2)
//! prefix = "photos/"        # Key prefix, stripped during normalization
//! public_base_url = ""      # Base for generated public URLs (CDN/custom domain)
//! force_path_style = false  # Required by most S3-compatible stores
//! root = ""                 # Local working tree root (git provider only)
//! connect_timeout_secs = 10
//! operation_timeout_secs = 60
//! max_attempts = 3          # Retry attempts for transient storage errors
//!
//! [options]
//! live_photo_detection = true
//! digest_suffix_length = 0  # 0 disables content-digest id suffixing
//! formats = ["jpg", "jpeg", "png", "webp", "tif", "tiff", "bmp", "avif", "heic", "heif"]
//! heic_converter = "heif-convert"  # External command for HEIC -> PNG conversion
//! thumbnail_max_dim = 600
//! thumbnail_quality = 80
//!
//! [logging]
//! level = "info"            # trace | debug | info | warn | error
//! file = ""                 # Optional log file path ("" = stderr only)
//!
//! [worker]
//! # count = 4               # Omit for auto = CPU cores
//! concurrency = 1           # Concurrent objects per worker slot
//! timeout_secs = 120        # Per-object processing timeout
//! ```
//!
//! ## Environment overrides
//!
//! A handful of deployment values can be overridden without touching the
//! config file: `GALLERY_S3_BUCKET`, `GALLERY_S3_ENDPOINT_URL`,
//! `GALLERY_S3_FORCE_PATH_STYLE`. AWS credentials come from the standard SDK
//! chain (env, profile, IMDS) and are never stored in `builder.toml`.
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which storage backend a build runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    S3,
    Git,
    Memory,
}

/// Resolved builder configuration.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected. Resolved
/// once per build invocation and treated as immutable for that run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    /// Storage backend settings (provider, endpoint, timeouts, retries).
    pub storage: StorageConfig,
    /// Pipeline feature toggles and format allow-list.
    pub options: OptionsConfig,
    /// Log verbosity and optional file output.
    pub logging: LoggingConfig,
    /// Worker pool sizing and per-object timeout.
    pub worker: WorkerConfig,
}

impl BuilderConfig {
    /// Validate config values are within acceptable ranges.
    ///
    /// This runs before any storage object is touched: a build must refuse
    /// to start on bad config rather than partially run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.storage.provider {
            ProviderKind::S3 => {
                if self.storage.bucket.is_empty() {
                    return Err(ConfigError::Validation(
                        "storage.bucket is required for the s3 provider".into(),
                    ));
                }
            }
            ProviderKind::Git => {
                if self.storage.root.is_empty() {
                    return Err(ConfigError::Validation(
                        "storage.root is required for the git provider".into(),
                    ));
                }
            }
            ProviderKind::Memory => {}
        }
        if self.options.formats.is_empty() {
            return Err(ConfigError::Validation(
                "options.formats must not be empty".into(),
            ));
        }
        if self.options.thumbnail_quality == 0 || self.options.thumbnail_quality > 100 {
            return Err(ConfigError::Validation(
                "options.thumbnail_quality must be 1-100".into(),
            ));
        }
        if self.options.thumbnail_max_dim < 16 {
            return Err(ConfigError::Validation(
                "options.thumbnail_max_dim must be at least 16".into(),
            ));
        }
        if self.options.digest_suffix_length > 64 {
            return Err(ConfigError::Validation(
                "options.digest_suffix_length must be 0-64".into(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Validation(
                "worker.concurrency must be at least 1".into(),
            ));
        }
        if self.worker.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "worker.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub provider: ProviderKind,
    /// S3 bucket name (s3 provider only).
    pub bucket: String,
    pub region: String,
    /// Custom endpoint URL for S3-compatible stores. Empty = AWS default.
    pub endpoint: String,
    /// Key prefix under which photos live; stripped during key normalization.
    pub prefix: String,
    /// Base URL for public object URLs (CDN or custom domain).
    /// Empty = derived from endpoint/bucket.
    pub public_base_url: String,
    /// Path-style addressing, required by most S3-compatible stores.
    pub force_path_style: bool,
    /// Local working-tree root (git provider only).
    pub root: String,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    /// Retry attempts for transient storage errors (timeouts, 5xx).
    pub max_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::S3,
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: String::new(),
            prefix: String::new(),
            public_base_url: String::new(),
            force_path_style: false,
            root: String::new(),
            connect_timeout_secs: 10,
            operation_timeout_secs: 60,
            max_attempts: 3,
        }
    }
}

/// Pipeline feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    /// Pair still images with video companions sharing a basename.
    pub live_photo_detection: bool,
    /// Hex chars of the content digest appended to item ids. 0 disables.
    pub digest_suffix_length: usize,
    /// Extension allow-list applied by `list_images`.
    pub formats: Vec<String>,
    /// External command used to convert HEIC/HEIF to an intermediate PNG.
    pub heic_converter: String,
    /// Longer-edge bound for generated thumbnails.
    pub thumbnail_max_dim: u32,
    /// AVIF encoding quality for thumbnails (1-100).
    pub thumbnail_quality: u8,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            live_photo_detection: true,
            digest_suffix_length: 0,
            formats: [
                "jpg", "jpeg", "png", "webp", "tif", "tiff", "bmp", "avif", "heic", "heif",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            heic_converter: "heif-convert".to_string(),
            thumbnail_max_dim: 600,
            thumbnail_quality: 80,
        }
    }
}

/// Log verbosity and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// Optional log file path. Empty = stderr only.
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: String::new(),
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Number of worker slots. When absent, defaults to the number of CPU
    /// cores. Values larger than the core count are clamped down.
    pub count: Option<usize>,
    /// Concurrent objects per worker slot.
    pub concurrency: usize,
    /// Per-object processing timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: None,
            concurrency: 1,
            timeout_secs: 120,
        }
    }
}

/// Resolve the effective parallelism cap from worker config.
///
/// - `count: None` → one slot per available core
/// - `count: Some(n)` → `min(n, cores)` (user can constrain down, not up)
///
/// The total in-flight bound is `slots × concurrency`.
pub fn effective_parallelism(config: &WorkerConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let slots = config.count.map(|n| n.min(cores).max(1)).unwrap_or(cores);
    slots * config.concurrency
}

// =============================================================================
// Loading and merging
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(BuilderConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file doesn't exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, apply environment
/// overrides, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<BuilderConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(stock_defaults_value(), ov),
        None => stock_defaults_value(),
    };
    let mut config: BuilderConfig = merged.try_into()?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load config from a `builder.toml` path.
///
/// Merges user values on top of stock defaults, applies env overrides,
/// rejects unknown keys, and validates the result.
pub fn load_config(path: &Path) -> Result<BuilderConfig, ConfigError> {
    resolve_config(load_raw_config(path)?)
}

/// Deployment-value overrides from the environment.
fn apply_env_overrides(config: &mut BuilderConfig) -> Result<(), ConfigError> {
    if let Ok(bucket) = std::env::var("GALLERY_S3_BUCKET") {
        if !bucket.is_empty() {
            config.storage.bucket = bucket;
        }
    }
    if let Ok(url) = std::env::var("GALLERY_S3_ENDPOINT_URL") {
        if !url.is_empty() {
            config.storage.endpoint = url;
            // Custom endpoints almost always need path-style; an explicit
            // GALLERY_S3_FORCE_PATH_STYLE below still wins.
            config.storage.force_path_style = true;
        }
    }
    if let Ok(raw) = std::env::var("GALLERY_S3_FORCE_PATH_STYLE") {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => config.storage.force_path_style = true,
            "0" | "false" | "no" => config.storage.force_path_style = false,
            other => {
                return Err(ConfigError::Validation(format!(
                    "GALLERY_S3_FORCE_PATH_STYLE must be a boolean, got {other:?}"
                )));
            }
        }
    }
    Ok(())
}

/// Returns a fully-commented stock `builder.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Gallery Builder Configuration
# =============================
# All settings are optional except storage.bucket (s3 provider) or
# storage.root (git provider). Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Storage backend
# ---------------------------------------------------------------------------
[storage]
# Backend: "s3" for S3-compatible object stores, "git" for a local
# working tree, "memory" for debugging.
provider = "s3"

# Bucket name. Required for the s3 provider.
# Overridable with GALLERY_S3_BUCKET.
bucket = ""

region = "us-east-1"

# Custom endpoint URL for S3-compatible stores (MinIO, Cloudflare R2).
# Leave empty for AWS. Overridable with GALLERY_S3_ENDPOINT_URL.
endpoint = ""

# Key prefix under which photos live, e.g. "photos/". Stripped from keys
# everywhere the pipeline compares them.
prefix = ""

# Base URL for public object URLs (CDN or custom domain).
# Leave empty to derive from the endpoint and bucket.
public_base_url = ""

# Path-style addressing. Required by most S3-compatible stores; set
# automatically when a custom endpoint is configured.
force_path_style = false

# Local working-tree root. Required for the git provider.
root = ""

connect_timeout_secs = 10
operation_timeout_secs = 60

# Retry attempts for transient storage errors (timeouts, 5xx).
# Auth failures are never retried.
max_attempts = 3

# ---------------------------------------------------------------------------
# Pipeline options
# ---------------------------------------------------------------------------
[options]
# Pair still images with video companions sharing a filename stem.
live_photo_detection = true

# Hex characters of the content digest appended to item ids, to
# disambiguate same-key-different-content cases. 0 disables suffixing.
digest_suffix_length = 0

# Image extension allow-list applied when listing the store.
formats = ["jpg", "jpeg", "png", "webp", "tif", "tiff", "bmp", "avif", "heic", "heif"]

# External command used to convert HEIC/HEIF to an intermediate PNG.
heic_converter = "heif-convert"

# Longer-edge bound for generated thumbnails.
thumbnail_max_dim = 600

# AVIF encoding quality for thumbnails (1-100).
thumbnail_quality = 80

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# trace | debug | info | warn | error
level = "info"

# Optional log file path. Empty = stderr only.
file = ""

# ---------------------------------------------------------------------------
# Worker pool
# ---------------------------------------------------------------------------
[worker]
# Number of worker slots. Omit or comment out to auto-detect
# (= number of CPU cores). The in-flight bound is count * concurrency.
# count = 4

# Concurrent objects per worker slot.
concurrency = 1

# Per-object processing timeout in seconds. An object exceeding this is
# recorded as failed; the run continues.
timeout_secs = 120
"##
}
