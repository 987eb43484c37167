//! Subscriber binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Result;
use cancha_client::Transport;
use cancha_client::subscriber::{self, SubscriberConfig};
use clap::Parser;

const BANNER: &str = r"
  ___ __ _ _ __   ___| |__   __ _
 / __/ _` | '_ \ / __| '_ \ / _` |
| (_| (_| | | | | (__| | | | (_| |
 \___\__,_|_| |_|\___|_| |_|\__,_|  subscriber
";

#[derive(Parser, Debug)]
#[command(name = "subscriber", about = "Cancha commentary subscriber", version)]
struct Args {
    /// Broker host address
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,

    /// Broker port
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Transport to reach the broker with
    #[arg(long, value_enum, default_value = "tcp")]
    transport: Transport,

    /// Comma-separated channels to subscribe to (0-255)
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    channels: Vec<u8>,

    /// Client identifier (at most 255 bytes)
    #[arg(long, default_value = "subscriber")]
    client_id: String,
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    println!("{BANNER}");
    println!("--    press ctrl+c to exit    --\n");

    let config = SubscriberConfig {
        addr: SocketAddr::new(args.host, args.port),
        transport: args.transport,
        channels: args.channels,
        client_id: args.client_id,
    };

    subscriber::run(config).await
}
