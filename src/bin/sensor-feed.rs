use std::net::SocketAddr;

use clap::Parser;
use tokio::net::UdpSocket;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use stampede_guard::simulator::{readings_for_step, Scenario};

/// Replay synthetic sensor traffic against a running service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP destination (the service's sensor feed port)
    #[arg(short, long, default_value = "127.0.0.1:8910")]
    addr: SocketAddr,

    /// Crowd scenario to synthesize
    #[arg(short, long, value_enum, default_value_t = Scenario::Calm)]
    scenario: Scenario,

    /// Milliseconds between simulation steps
    #[arg(short, long, default_value_t = 200)]
    interval_ms: u64,

    /// Stop after this many steps (0 = run until interrupted)
    #[arg(long, default_value_t = 0)]
    steps: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    info!(
        "feeding {:?} scenario to {} every {}ms",
        args.scenario, args.addr, args.interval_ms
    );

    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    let mut step = 0u64;
    loop {
        ticker.tick().await;
        for reading in readings_for_step(args.scenario, step) {
            let payload = serde_json::to_vec(&reading)?;
            if let Err(e) = socket.send_to(&payload, args.addr).await {
                warn!("send failed: {}", e);
            }
        }
        step += 1;
        if args.steps > 0 && step >= args.steps {
            info!("done after {} steps", step);
            break;
        }
    }
    Ok(())
}
