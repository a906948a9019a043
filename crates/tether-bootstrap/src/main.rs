//! Tether bootstrap entry point

mod cli;
mod console;

use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use tether_core::{Bootstrapper, PlatformKey, Presenter, TracingPresenter};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, ExitCode};
use crate::console::ConsolePresenter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    // Configuration errors are reported after logging is up
    let config = cli.load_config();

    let filter = EnvFilter::try_new(cli.log_filter(config.as_ref().ok()))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::for_anyhow(&e).to_exit_code();
        }
    };

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Bootstrap aborted");
            ExitCode::for_anyhow(&e).to_exit_code()
        }
    }
}

async fn run(
    cli: Cli,
    config: tether_core::BootstrapConfig,
) -> anyhow::Result<std::process::ExitCode> {
    let translator = cli.translator(&config);
    let install_root = config.resolve_install_root(cli.path.as_deref())?;
    let platform = PlatformKey::current()?;

    // Progress bars only make sense on a terminal; otherwise status goes to the log
    let console = std::io::stderr()
        .is_terminal()
        .then(|| Arc::new(ConsolePresenter::new(translator.clone())));
    let presenter: Arc<dyn Presenter> = match &console {
        Some(console) => console.clone(),
        None => Arc::new(TracingPresenter),
    };

    let bootstrapper = Bootstrapper::new(
        config,
        install_root,
        cli.path.is_some(),
        platform,
        presenter,
        translator,
    )?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        })
    };

    let result = bootstrapper.run(&cancel).await;
    interrupt.abort();

    let outcome = match result {
        Ok(outcome) => {
            if let Some(console) = &console {
                console.finish();
            }
            outcome
        }
        // The presenter already shows the localized message
        Err(e) => return Ok(ExitCode::for_error(&e).to_exit_code()),
    };

    let launch = outcome.launch;
    if cli.no_launch {
        println!("{}", launch.program.display());
        for arg in &launch.args {
            println!("  {arg}");
        }
        return Ok(ExitCode::Success.to_exit_code());
    }

    info!(
        program = %launch.program.display(),
        args = ?launch.args,
        "Launching"
    );
    let status = tokio::process::Command::from(launch.command())
        .status()
        .await?;

    Ok(match status.code() {
        Some(code) => std::process::ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::GeneralError.to_exit_code(),
    })
}
