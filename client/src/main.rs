use clap::Parser;
use client::network::{Client, ClientError, PollOutcome};
use log::{info, warn};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:4512")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Milliseconds between polls; defaults to the server's suggestion
    #[arg(short = 'p', long)]
    poll_ms: Option<u64>,

    /// Only follow changes in this region
    #[arg(short = 'r', long)]
    scope: Option<u32>,

    /// Stop after this many polls
    #[arg(short = 'n', long)]
    polls: Option<u64>,

    /// Do not ask the server for early ticks
    #[arg(long)]
    not_ready: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    let mut client = Client::join(&args.server).await?;
    client.set_scope(args.scope);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
        client.set_fake_ping(args.fake_ping);
    }

    let mut polls = 0u64;
    loop {
        if args.polls.map_or(false, |limit| polls >= limit) {
            break;
        }
        polls += 1;

        match client.poll(!args.not_ready).await {
            Ok(PollOutcome::Updated { time, changes }) => {
                info!(
                    "Time {}: applied {} changes, {} units",
                    time,
                    changes,
                    client.game().unit_count()
                );
            }
            Ok(PollOutcome::Resynced { time, units }) => {
                info!("Resynchronized at time {} with {} units", time, units);
            }
            Ok(PollOutcome::Wait { .. }) => {}
            // The next poll asks for a full table.
            Err(ClientError::Replay(e)) => warn!("Could not replay changes: {}", e),
            Err(e) => return Err(e.into()),
        }

        let delay = args.poll_ms.unwrap_or(client.update_length() as u64 / 4);
        tokio::select! {
            _ = sleep(Duration::from_millis(delay.max(10))) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
