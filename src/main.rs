use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use sqlgate::config::{LogFormat, LogLevel};
use sqlgate::{CliArgs, Config, Gateway, server};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "sqlgate";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = setup().await?;
    run(config).await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() -> std::io::Result<Config> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli).await.map_err(std::io::Error::other)?;

    init_tracing(config.log_level, config.log_format);
    Ok(config)
}

fn init_tracing(level: LogLevel, format: LogFormat) {
    let filter = EnvFilter::try_new(level.as_str()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run(config: Config) -> std::io::Result<()> {
    let gateway = Gateway::from_config(&config).map_err(std::io::Error::other)?;
    let gateway = Arc::new(gateway);

    gateway.start().await;
    let health = gateway.health_probe().await;
    info!(
        "{} backend {}: {}",
        APP_NAME,
        gateway.pool().target(),
        health.status
    );

    let socket = if config.listen_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(config.listen_addr)?;

    let listener: TcpListener = socket.listen(1024)?;

    info!(
        "{} listening on {} ({} mode)",
        APP_NAME,
        config.listen_addr,
        gateway.mode().as_str()
    );

    server::serve(Arc::clone(&gateway), listener, signal::ctrl_c()).await;

    info!("{} shutting down", APP_NAME);
    gateway.stop();
    Ok(())
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
