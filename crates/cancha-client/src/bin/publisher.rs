//! Publisher binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use cancha_client::Transport;
use cancha_client::publisher::{self, PublisherConfig};
use clap::Parser;

const BANNER: &str = r"
  ___ __ _ _ __   ___| |__   __ _
 / __/ _` | '_ \ / __| '_ \ / _` |
| (_| (_| | | | | (__| | | | (_| |
 \___\__,_|_| |_|\___|_| |_|\__,_|  publisher
";

#[derive(Parser, Debug)]
#[command(name = "publisher", about = "Cancha commentary publisher", version)]
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

    /// Channel to publish on (0-255)
    #[arg(short, long, default_value_t = 0)]
    channel: u8,

    /// Message generator seed (0 = random)
    #[arg(short, long, default_value_t = 0)]
    seed: u32,

    /// Delay between messages in milliseconds
    #[arg(short, long, default_value_t = 500)]
    delay: u32,

    /// Client identifier (at most 255 bytes)
    #[arg(long, default_value = "publisher")]
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

    let config = PublisherConfig {
        addr: SocketAddr::new(args.host, args.port),
        transport: args.transport,
        channel: args.channel,
        client_id: args.client_id,
        seed: (args.seed != 0).then_some(args.seed),
        delay: Duration::from_millis(u64::from(args.delay)),
    };

    publisher::run(config).await
}
