// procmux CLI entry point

use clap::Parser;
use procmux_cli::{run, Cli, FAILURE_EXIT_CODE};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("procmux: {:#}", e);
            FAILURE_EXIT_CODE
        }
    };

    // Exit without waiting on the blocking stdin reader.
    std::process::exit(code);
}
