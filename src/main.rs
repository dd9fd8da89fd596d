//! ecoverify CLI entry point.

use clap::Parser;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ecoverify::cli::commands::verify;
use ecoverify::cli::{exit_code_for, Cli, EXIT_CONFIG_ERROR};
use ecoverify::infrastructure::config::ConfigLoader;
use ecoverify::infrastructure::logging::LoggerImpl;

fn report_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", style("error:").red().bold());
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(err) => {
            report_error(&err);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    verify::apply_overrides(&cli, &mut config);

    let logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => {
            report_error(&err);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; rolling back in-flight projects");
            on_signal.cancel();
        }
    });

    let code = match verify::execute(&cli, config, cancel).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            exit_code_for(&err)
        }
    };

    // Flush file logs before exiting
    drop(logger);
    std::process::exit(code);
}
