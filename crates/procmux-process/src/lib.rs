//! # procmux-process
//!
//! **Purpose**: Lifecycle management for spawned processes and pty sessions,
//! with output delivered as bounded, rate-limited chunks
//!
//! ## Features
//!
//! - **Coalescing Buffer**: Re-emits arbitrary byte pushes as chunks of at
//!   most `max_chunk_size` bytes, at most one per `emit_interval`
//! - **Managed Process**: Exit and error notifications plus a coalesced
//!   output stream over any [`ProcessLauncher`] backend
//! - **Process Registry**: Monotonic identifiers with automatic cleanup on
//!   exit, failure or disposal
//! - **Process Service**: `create` returns an identifier or `-1`, never an
//!   error
//! - **Native Backend**: `tokio::process` with process-group tree kill
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use procmux_process::{NativeLauncher, ProcessConfig, ProcessService, ServiceConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let service = ProcessService::new(Arc::new(NativeLauncher::new()), ServiceConfig::default());
//!
//! let id = service.create(ProcessConfig::new("ls").args(["-la"])).await;
//! if let Some(process) = service.get(id) {
//!     let mut output = process.create_output_stream();
//!     while let Some(chunk) = output.recv().await {
//!         print!("{}", String::from_utf8_lossy(&chunk));
//!     }
//! }
//! # }
//! ```

pub mod buffer;
pub mod child;
pub mod config;
pub mod emitter;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod native;
pub mod process;
pub mod registry;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::CoalescingBuffer;
pub use child::NativeChild;
pub use config::{default_shell, BufferConfig, ProcessConfig, ServiceConfig, TerminalSize};
pub use emitter::Emitter;
pub use error::{ConfigError, ProcessError, Result};
pub use launcher::{LaunchedProcess, ProcessControl, ProcessLauncher, TerminalControl};
pub use native::NativeLauncher;
pub use process::{FailureKind, ManagedProcess, ProcessFailure, ProcessInfo, ProcessState};
pub use registry::{ProcessId, ProcessRegistry, FAILED_PROCESS_ID};
pub use service::ProcessService;
