// Drives one managed process from the terminal

use std::sync::Arc;

use anyhow::{Context, Result};
use procmux_process::{
    logging, ManagedProcess, NativeLauncher, ProcessLauncher, ProcessService, FAILED_PROCESS_ID,
};
use procmux_pty::PtyLauncher;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::cli::Cli;

/// Exit status when creation fails or the process fails at runtime
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Exit status after an interrupt
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Run the command described by `cli` to completion
///
/// Returns the exit status procmux itself should exit with.
pub async fn run(cli: Cli) -> Result<i32> {
    logging::init(logging::parse_level(&cli.log_level), cli.verbose);

    let settings = cli.service_config()?;
    let launcher: Arc<dyn ProcessLauncher> = if cli.pty {
        Arc::new(PtyLauncher::new())
    } else {
        Arc::new(NativeLauncher::new())
    };
    let service = ProcessService::new(launcher, settings);

    let mut attached = None;
    let id = service
        .create_with(cli.process_config(), |process| {
            attached = Some((
                Arc::clone(process),
                process.create_output_stream(),
                process.subscribe_exit(),
                process.subscribe_error(),
            ));
        })
        .await;

    if id == FAILED_PROCESS_ID {
        eprintln!("procmux: failed to start '{}'", cli.command.join(" "));
        return Ok(FAILURE_EXIT_CODE);
    }
    let (process, mut output, mut exit, mut errors) =
        attached.context("process was registered without being attached")?;
    debug!(id, info = ?process.info(), "Streaming process output");

    let mut stdout = tokio::io::stdout();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let code = loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(chunk) => {
                    stdout.write_all(&chunk).await?;
                    stdout.flush().await?;
                }
                None => break exit_status(&process, &mut exit, &mut errors).await,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => forward_line(&process, line).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            code = exit.recv() => {
                // Every chunk is emitted before the exit notification.
                while let Ok(chunk) = output.try_recv() {
                    stdout.write_all(&chunk).await?;
                }
                stdout.flush().await?;
                break match code {
                    Some(code) => code,
                    None => exit_status(&process, &mut exit, &mut errors).await,
                };
            }
            _ = tokio::signal::ctrl_c() => {
                info!(id, "Interrupted, shutting down");
                service.shutdown().await;
                break INTERRUPTED_EXIT_CODE;
            }
        }
    };

    service.shutdown().await;
    Ok(code)
}

async fn forward_line(process: &ManagedProcess, mut line: String) {
    line.push('\n');
    if let Err(e) = process.write(line).await {
        debug!(error = %e, "Dropped stdin line");
    }
}

async fn exit_status(
    process: &ManagedProcess,
    exit: &mut tokio::sync::mpsc::UnboundedReceiver<i32>,
    errors: &mut tokio::sync::mpsc::UnboundedReceiver<procmux_process::ProcessFailure>,
) -> i32 {
    if let Some(code) = exit.recv().await {
        return code;
    }
    if let Some(failure) = errors.recv().await.or_else(|| process.last_error()) {
        eprintln!("procmux: {}", failure.message);
    }
    process.exit_code().unwrap_or(FAILURE_EXIT_CODE)
}
