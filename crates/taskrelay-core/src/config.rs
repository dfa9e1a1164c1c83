//! Background tool configuration and settings sources.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names of the tools that manage background tasks. They are never bounded
/// by the tool-call timeout and never escalated.
pub const BACKGROUND_TOOL_NAMES: [&str; 4] = [
    "get_tool_output",
    "wait_tool_result",
    "stop_tool",
    "list_running_tools",
];

/// Settings key holding the background task timeout in seconds.
pub const BACKGROUND_TASK_TIMEOUT_KEY: &str = "provider_settings.background_task_wait_timeout";

/// Settings key holding a [`BackgroundToolConfig`] object.
pub const BACKGROUND_TOOL_CONFIG_KEY: &str = "background_tool";

// Default configuration constants
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600; // 10 minutes
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_OUTPUT_BUFFER_LINES: usize = 1000;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_TASK_MAX_AGE_SECS: u64 = 3600;
pub const DEFAULT_ERROR_PREVIEW_MAX_LENGTH: usize = 500;
pub const DEFAULT_OUTPUT_LINES: usize = 50;
pub const DEFAULT_WAIT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_CACHE_TTL_SECS: u64 = 60;
const MIN_WAIT_POLL_INTERVAL_MS: u64 = 10;

pub fn is_background_tool(name: &str) -> bool {
    BACKGROUND_TOOL_NAMES.contains(&name)
}

/// Background tool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundToolConfig {
    /// Fallback background task timeout when settings carry none.
    pub task_timeout_secs: u64,
    /// Default timeout for non-interruptible waits.
    pub wait_timeout_secs: u64,
    pub output_buffer_lines: usize,
    pub cleanup_interval_secs: u64,
    /// Retention window for finished tasks.
    pub task_max_age_secs: u64,
    pub error_preview_max_length: usize,
    /// Lines of output included in notifications and `get_tool_output`.
    pub default_output_lines: usize,
    pub wait_poll_interval_ms: u64,
    pub timeout_cache_ttl_secs: u64,
}

impl Default for BackgroundToolConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            output_buffer_lines: DEFAULT_OUTPUT_BUFFER_LINES,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            task_max_age_secs: DEFAULT_TASK_MAX_AGE_SECS,
            error_preview_max_length: DEFAULT_ERROR_PREVIEW_MAX_LENGTH,
            default_output_lines: DEFAULT_OUTPUT_LINES,
            wait_poll_interval_ms: DEFAULT_WAIT_POLL_INTERVAL_MS,
            timeout_cache_ttl_secs: DEFAULT_TIMEOUT_CACHE_TTL_SECS,
        }
    }
}

impl BackgroundToolConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.task_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Task timeout must be at least 1 second"));
        }

        if self.output_buffer_lines == 0 {
            return Err(anyhow::anyhow!("Output buffer must hold at least 1 line"));
        }

        if self.cleanup_interval_secs == 0 {
            return Err(anyhow::anyhow!("Cleanup interval must be at least 1 second"));
        }

        if self.default_output_lines == 0 {
            return Err(anyhow::anyhow!("Default output lines must be at least 1"));
        }

        if self.wait_poll_interval_ms < MIN_WAIT_POLL_INTERVAL_MS {
            return Err(anyhow::anyhow!(
                "Wait poll interval must be at least {} ms",
                MIN_WAIT_POLL_INTERVAL_MS
            ));
        }

        Ok(())
    }

    /// Load from the `background_tool` object of a settings source, falling
    /// back to defaults for anything missing.
    pub fn from_settings(source: &dyn SettingsSource) -> Result<Self> {
        let config = match source.get(BACKGROUND_TOOL_CONFIG_KEY) {
            Some(value) => serde_json::from_value::<Self>(value)
                .context("Invalid background_tool settings")?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn task_max_age(&self) -> Duration {
        Duration::from_secs(self.task_max_age_secs)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn timeout_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.timeout_cache_ttl_secs)
    }
}

/// External key-value settings. Keys are dotted paths into nested objects.
pub trait SettingsSource: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
}

fn lookup_path(root: &Value, key: &str) -> Option<Value> {
    key.split('.')
        .try_fold(root, |node, segment| node.get(segment))
        .cloned()
}

/// Settings read from a JSON document on disk.
///
/// The file is re-read on every lookup; wrap lookups in a cache such as
/// [`TimeoutCache`] when they sit on a hot path.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the whole document.
    pub fn load(&self) -> Result<Value> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings {}", self.path.display()))?;
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        serde_json::from_str(raw)
            .with_context(|| format!("Failed to parse settings {}", self.path.display()))
    }
}

impl SettingsSource for JsonFileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        if !self.path.exists() {
            return None;
        }
        match self.load() {
            Ok(root) => lookup_path(&root, key),
            Err(e) => {
                tracing::debug!(error = %e, key, "Settings lookup failed");
                None
            }
        }
    }
}

/// In-memory settings, keyed by full dotted path.
#[derive(Debug, Default)]
pub struct StaticSettings {
    values: Mutex<HashMap<String, Value>>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.lock().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

impl SettingsSource for StaticSettings {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.lock();
        if let Some(value) = values.get(key) {
            return Some(value.clone());
        }
        // Allow nested lookups through a stored parent object.
        let (parent, rest) = key.split_once('.')?;
        values.get(parent).and_then(|root| lookup_path(root, rest))
    }
}

/// Background task timeout read from settings, cached for a short TTL.
pub struct TimeoutCache {
    source: Arc<dyn SettingsSource>,
    default: Duration,
    ttl: Duration,
    cached: Mutex<Option<(Duration, Instant)>>,
}

impl TimeoutCache {
    pub fn new(source: Arc<dyn SettingsSource>, default: Duration, ttl: Duration) -> Self {
        Self {
            source,
            default,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Duration {
        let mut cached = self.cached.lock();
        if let Some((value, fetched_at)) = *cached
            && fetched_at.elapsed() < self.ttl
        {
            return value;
        }
        let value = self.read();
        *cached = Some((value, Instant::now()));
        value
    }

    /// Drop the cached value so the next lookup re-reads the source.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    fn read(&self) -> Duration {
        self.source
            .get(BACKGROUND_TASK_TIMEOUT_KEY)
            .and_then(|v| v.as_f64())
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(self.default)
    }
}
