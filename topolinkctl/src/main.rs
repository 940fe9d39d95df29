mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use env_logger::{Builder, Target};
use log::LevelFilter;
use tokio::sync::broadcast::{self, error::RecvError};
use topolink_core::{
    AssetCache, ClientSettings, Controller, ControllerEvent, HttpTransport,
};

use cli::{Cli, Command};

fn init_logger() {
    Builder::new()
        .target(Target::Stderr)
        .filter_level(LevelFilter::Warn)
        .filter_module("topolink_core", LevelFilter::Info)
        .filter_module("topolinkctl", LevelFilter::Info)
        .init();
}

fn load_settings(cli: &Cli) -> Result<ClientSettings> {
    let mut settings = match &cli.config {
        Some(path) => ClientSettings::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientSettings::load().context("loading settings")?,
    };
    if let Some(server) = &cli.server {
        settings
            .apply_overrides(Some(server.as_str()), None)
            .context("--server")?;
    }
    Ok(settings)
}

fn cache_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.cache_dir {
        return Ok(dir.clone());
    }
    dirs::cache_dir()
        .map(|dir| dir.join("topolink").join("assets"))
        .ok_or_else(|| anyhow!("no cache directory on this platform, use --cache-dir"))
}

fn build_controller(cli: &Cli, settings: &ClientSettings) -> Result<Controller> {
    let cache = AssetCache::persistent(cache_dir(cli)?)?;
    Ok(Controller::builder()
        .settings(settings.clone())
        .cache(cache)
        .build()?)
}

fn attach(controller: &Controller, settings: &ClientSettings) -> Result<()> {
    let transport = HttpTransport::from_settings(settings)
        .context("creating HTTP transport")?;
    controller.attach_transport(Arc::new(transport));
    Ok(())
}

/// Wait for the first handshake outcome. `events` must be subscribed before
/// the transport is attached.
async fn wait_connected(
    mut events: broadcast::Receiver<ControllerEvent>,
    wait: Duration,
) -> Result<()> {
    let connected = async {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::Connected) => return Ok(()),
                Ok(ControllerEvent::HandshakeFailed { message }) => {
                    return Err(anyhow!(message));
                }
                Ok(ControllerEvent::RetryScheduled { .. }) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("controller went away"),
            }
        }
    };
    tokio::time::timeout(wait, connected)
        .await
        .with_context(|| format!("no answer from server within {wait:?}"))?
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        init_logger();
    } else {
        env_logger::init();
    }

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match &cli.command {
        Command::ShowSettings => {
            print!("{}", settings.to_toml()?);
        }
        Command::Version { wait } => {
            let controller = build_controller(&cli, &settings)?;
            let events = controller.subscribe();
            attach(&controller, &settings)?;
            wait_connected(events, Duration::from_secs(*wait)).await?;
            let response = controller
                .get(&settings.controller.handshake_path)
                .await?;
            println!("{}", response.text());
        }
        Command::Get { path, timeout } => {
            let controller = build_controller(&cli, &settings)?;
            attach(&controller, &settings)?;
            let response = match timeout {
                Some(secs) => {
                    controller
                        .get_synchronous(path, Duration::from_secs(*secs))
                        .await?
                }
                None => controller.get_synchronous_default(path).await?,
            };
            println!("{}", response.text());
        }
        Command::FetchStatic { url } => {
            let controller = build_controller(&cli, &settings)?;
            attach(&controller, &settings)?;
            let path = controller
                .fetch_static(url)
                .await
                .ok_or_else(|| anyhow!("failed to fetch {url}"))?;
            println!("{}", path.display());
        }
        Command::FetchIcon { symbol } => {
            let controller = build_controller(&cli, &settings)?;
            attach(&controller, &settings)?;
            let icon = controller
                .fetch_icon(symbol)
                .await
                .ok_or_else(|| anyhow!("failed to fetch icon {symbol}"))?;
            println!("{}", icon.path().display());
        }
    }
    Ok(())
}
