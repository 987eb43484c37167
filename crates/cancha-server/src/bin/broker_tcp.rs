//! TCP broker binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use cancha_core::TcpBrokerConfig;
use cancha_server::TcpServer;
use clap::Parser;
use tracing::info;

const BANNER: &str = r"
  ___ __ _ _ __   ___| |__   __ _
 / __/ _` | '_ \ / __| '_ \ / _` |
| (_| (_| | | | | (__| | | | (_| |
 \___\__,_|_| |_|\___|_| |_|\__,_|  broker (tcp)
";

#[derive(Parser, Debug)]
#[command(name = "broker-tcp", about = "Cancha pub/sub broker over TCP", version)]
struct Args {
    /// Listen host address
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,

    /// Listen port
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    println!("{BANNER}");
    println!("--    press ctrl+c to exit    --\n");

    let addr = SocketAddr::new(args.host, args.port);
    let server = TcpServer::bind(addr, TcpBrokerConfig::default())
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %server.local_addr()?, "broker listening");
    server.run_until_ctrl_c().await?;

    Ok(())
}
