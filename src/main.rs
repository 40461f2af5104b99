use clap::Parser;
use log::error;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use sitewatch::cli::Cli;
use sitewatch::config::Config;
use sitewatch::worker;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level().as_str()),
    )
    .init();

    if cli.list {
        return match worker::list_sites(&cli) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let config = match Config::load(cli.settings.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    match worker::check_sites(&cli, &config, &token).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
