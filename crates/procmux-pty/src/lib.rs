//! procmux PTY - Pseudo-terminal backend for procmux
//!
//! Provides a [`ProcessLauncher`](procmux_process::ProcessLauncher) that runs
//! commands attached to a pseudo-terminal, so interactive shells behave as if
//! they were on a real terminal device. Output coalescing, identifiers and
//! lifecycle tracking come from `procmux-process`.

pub mod launcher;
pub mod session;

// Re-export commonly used types
pub use launcher::PtyLauncher;
pub use session::{PtyChild, PtyTerminal};
