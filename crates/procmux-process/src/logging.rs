//! Tracing subscriber setup for binaries embedding procmux

use tracing::Level;

/// Parse a log level name, falling back to INFO
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a formatted subscriber writing to stderr
///
/// `verbose` adds targets, thread ids and source locations. Returns false if
/// a global subscriber was already installed.
pub fn init(level: Level, verbose: bool) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(verbose)
        .with_thread_ids(verbose)
        .with_file(verbose)
        .with_line_number(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
