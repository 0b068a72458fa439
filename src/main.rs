//! lanchat server entry point

use clap::Parser;
use lanchat::config::ServerConfig;
use lanchat::net::ChatServer;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "lanchat", version, about = "lanchat: LAN group chat server")]
struct Args {
    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// TCP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum concurrent clients
    #[arg(short, long)]
    max_clients: Option<usize>,

    /// Messages per minute per client
    #[arg(short, long)]
    rate_limit: Option<u32>,

    /// UDP port for the discovery beacon
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Close sessions on validation failures instead of dropping frames
    #[arg(long)]
    strict: bool,

    /// Optional TOML configuration file; CLI flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, lanchat::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(rate_limit) = self.rate_limit {
            config.rate_limit_messages_per_minute = rate_limit;
        }
        if let Some(discovery_port) = self.discovery_port {
            config.discovery_port = discovery_port;
        }
        if self.strict {
            config.strict_validation = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lanchat=info".parse().unwrap()),
        )
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("lanchat v{} starting on {}:{}", VERSION, config.host, config.port);

    let server = match ChatServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut serve = tokio::spawn(server.clone().run());

    // A bind failure surfaces before any signal arrives; otherwise the
    // first signal triggers the graceful drain
    tokio::select! {
        finished = &mut serve => {
            return match finished {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(e)) => {
                    error!("server error: {}", e);
                    ExitCode::FAILURE
                }
                Err(e) => {
                    error!("server task failed: {}", e);
                    ExitCode::FAILURE
                }
            };
        }
        _ = wait_for_signal() => server.shutdown(),
    }

    match serve.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("server error: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("server task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("received interrupt");
}
