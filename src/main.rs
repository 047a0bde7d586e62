use clap::Parser;
use color_eyre::Result;
use sensor_keel::{cli, config::Config, logging, server};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    hangup.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    futures::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(cli.stdout_level(), cli.file_logging()).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    let (link, server) = server::run_on_port(config, cli.port)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
        result = server => {
            error!(?result, "Server returned");
            logging::shutdown();
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly: {result:?}"));
        }
    }

    if let Err(e) = link.shutdown().await {
        debug!(%e, "Link already gone");
    }

    logging::shutdown();

    Ok(())
}
