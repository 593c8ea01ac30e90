use std::io::Write;
use std::sync::Arc;

use cfy_deploy::cli::Cli;
use cfy_deploy::commands::{connect, execute, exit_code};
use cfy_deploy::exit;
use cfy_deploy::telemetry::init_tracing;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping");
                cancel.cancel();
            }
        }
    });

    let code = match run(&cli, &cancel).await {
        Ok(()) => exit::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code(&err)
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
    let manager = Arc::new(connect(&cli.connection)?);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(&cli.command, manager, cancel, &mut out).await?;
    out.flush()?;
    Ok(())
}
