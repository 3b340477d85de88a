use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use trellis_server::{ServerConfig, TrellisServer};

#[derive(Parser)]
#[command(name = "trellis-server", about = "Reference remote datastore for Trellis", version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP address, overriding the configuration
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Realtime address, overriding the configuration
    #[arg(long)]
    realtime: Option<SocketAddr>,

    /// Disable the realtime listener
    #[arg(long, conflicts_with = "realtime")]
    no_realtime: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(realtime) = cli.realtime {
        config.realtime_addr = Some(realtime);
    }
    if cli.no_realtime {
        config.realtime_addr = None;
    }

    TrellisServer::new(config).serve().await?;
    Ok(())
}
