use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use worktrack_cli::{error_envelope, run_cli, Cli};

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("WORKTRACK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run_cli(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            eprintln!("{}", error_envelope(&err));
            ExitCode::FAILURE
        }
    }
}
