//! Process, buffer and service configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default upper bound on a single emitted output chunk
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024;
/// Default delay between buffering and emission
pub const DEFAULT_EMIT_INTERVAL_MS: u64 = 16;
/// Default wait for output readers to hit end-of-stream after exit
pub const DEFAULT_OUTPUT_DRAIN_TIMEOUT_MS: u64 = 250;
/// Default wait for a killed process to be reaped
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 5_000;

/// Terminal dimensions for pseudo-terminal backed processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Rows
    pub rows: u16,
    /// Columns
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Launch parameters for a managed process
///
/// Everything except `command` is optional: `cwd` falls back to the host's
/// working directory and `env` is layered on top of the inherited
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Executable command
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory (None = current dir)
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment variables (added to parent env)
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Terminal size, only honored by pty backends
    #[serde(default)]
    pub size: Option<TerminalSize>,
}

impl ProcessConfig {
    /// Create new process configuration
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Run `command_line` through the host's default shell
    pub fn shell(command_line: impl Into<String>) -> Self {
        let flag = if cfg!(windows) { "/C" } else { "-c" };
        Self::new(default_shell()).args([flag.to_string(), command_line.into()])
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set working directory
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set terminal size
    pub fn size(mut self, rows: u16, cols: u16) -> Self {
        self.size = Some(TerminalSize { rows, cols });
        self
    }

    /// Reject configurations that cannot be launched
    pub fn validate(&self) -> crate::Result<()> {
        if self.command.trim().is_empty() {
            return Err(crate::ProcessError::InvalidConfig(
                "command must not be empty".to_string(),
            ));
        }
        if let Some(size) = self.size {
            if size.rows == 0 || size.cols == 0 {
                return Err(crate::ProcessError::InvalidConfig(format!(
                    "terminal size must be non-zero, got {}x{}",
                    size.rows, size.cols
                )));
            }
        }
        Ok(())
    }
}

/// The host's default interactive shell
pub fn default_shell() -> String {
    if cfg!(windows) {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    } else {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// Output coalescing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Hard upper bound on any single emitted chunk, in bytes
    pub max_chunk_size: usize,
    /// Minimum delay before buffered bytes are emitted, in milliseconds
    pub emit_interval_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            emit_interval_ms: DEFAULT_EMIT_INTERVAL_MS,
        }
    }
}

impl BufferConfig {
    /// Create config with explicit bounds
    pub fn new(max_chunk_size: usize, emit_interval: Duration) -> Self {
        Self {
            max_chunk_size,
            emit_interval_ms: emit_interval.as_millis() as u64,
        }
    }

    /// Emission interval as a duration
    pub fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.emit_interval_ms)
    }

    /// Set maximum chunk size
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Set emission interval
    pub fn with_emit_interval(mut self, interval: Duration) -> Self {
        self.emit_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Validate bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_size == 0 {
            return Err(ConfigError::Validation(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the process creation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Output coalescing applied to every managed process
    pub buffer: BufferConfig,
    /// How long exit delivery waits for output to reach end-of-stream
    pub output_drain_timeout_ms: u64,
    /// How long disposal waits for a killed process to be reaped
    pub kill_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            output_drain_timeout_ms: DEFAULT_OUTPUT_DRAIN_TIMEOUT_MS,
            kill_timeout_ms: DEFAULT_KILL_TIMEOUT_MS,
        }
    }
}

impl ServiceConfig {
    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Apply `PROCMUX_*` environment overrides
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_u64("PROCMUX_MAX_CHUNK_SIZE")? {
            self.buffer.max_chunk_size = value as usize;
        }
        if let Some(value) = env_u64("PROCMUX_EMIT_INTERVAL_MS")? {
            self.buffer.emit_interval_ms = value;
        }
        if let Some(value) = env_u64("PROCMUX_OUTPUT_DRAIN_TIMEOUT_MS")? {
            self.output_drain_timeout_ms = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.buffer.validate()
    }

    /// Output drain timeout as a duration
    pub fn output_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.output_drain_timeout_ms)
    }

    /// Kill timeout as a duration
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::Env(format!("{}={}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
