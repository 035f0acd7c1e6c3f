//! procmux command line front end
//!
//! Runs a single command through [`procmux_process::ProcessService`],
//! streaming its coalesced output to stdout and forwarding stdin lines.

pub mod cli;
pub mod runner;

pub use cli::Cli;
pub use runner::{run, FAILURE_EXIT_CODE, INTERRUPTED_EXIT_CODE};
