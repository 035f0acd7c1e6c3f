// Command line arguments

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use procmux_process::{ProcessConfig, ServiceConfig};

/// procmux - run a command and stream its output in coalesced chunks
#[derive(Parser, Debug)]
#[command(name = "procmux")]
#[command(bin_name = "procmux")]
#[command(about = "Run a command and stream its output in coalesced chunks")]
#[command(version)]
pub struct Cli {
    /// Attach the command to a pseudo-terminal
    #[arg(long)]
    pub pty: bool,

    /// Terminal rows (pty only)
    #[arg(long, requires = "pty")]
    pub rows: Option<u16>,

    /// Terminal columns (pty only)
    #[arg(long, requires = "pty")]
    pub cols: Option<u16>,

    /// TOML settings file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Largest chunk emitted at once, in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_chunk_size: Option<usize>,

    /// Minimum delay between chunks
    #[arg(long, value_name = "MS")]
    pub emit_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Include targets and source locations in logs
    #[arg(short, long)]
    pub verbose: bool,

    /// Working directory for the command
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable, repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "CMD")]
    pub command: Vec<String>,
}

fn parse_env(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

impl Cli {
    /// Settings from the config file, then `PROCMUX_*` variables, then flags
    pub fn service_config(&self) -> Result<ServiceConfig> {
        let config = match self.config {
            Some(ref path) => ServiceConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        let mut config = config
            .apply_env_overrides()
            .context("invalid PROCMUX_* environment override")?;

        if let Some(size) = self.max_chunk_size {
            config.buffer = config.buffer.with_max_chunk_size(size);
        }
        if let Some(ms) = self.emit_interval_ms {
            config.buffer = config.buffer.with_emit_interval(Duration::from_millis(ms));
        }
        config.validate().context("invalid settings")?;
        Ok(config)
    }

    /// Launch parameters for the requested command
    pub fn process_config(&self) -> ProcessConfig {
        let (program, args) = match self.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };

        let mut config = ProcessConfig::new(program).args(args);
        if let Some(ref dir) = self.cwd {
            config = config.cwd(dir);
        }
        for (key, value) in &self.env {
            config = config.env(key, value);
        }
        if self.pty {
            let defaults = procmux_process::TerminalSize::default();
            config = config.size(
                self.rows.unwrap_or(defaults.rows),
                self.cols.unwrap_or(defaults.cols),
            );
        }
        config
    }
}
