use clap::Parser;
use log::info;
use server::change_log::Retention;
use server::network::{Server, ServerConfig, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Grid subdivisions (0-7)
    #[arg(short, long, default_value = "4")]
    size: u32,

    /// Sea level: 0-10000
    #[arg(short = 'l', long, default_value = "5000")]
    sea_level: i32,

    /// Milliseconds between ticks
    #[arg(short, long, default_value = "1000")]
    tick_ms: u64,

    /// Units spawned at startup
    #[arg(short, long, default_value = "15")]
    units: usize,

    /// Load the grid from this file instead of generating one
    #[arg(long)]
    grid_file: Option<PathBuf>,

    /// Save the generated grid to this file
    #[arg(long)]
    save_grid: Option<PathBuf>,

    /// Change blocks kept for slow clients
    #[arg(short, long, default_value = "200")]
    retention: usize,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Drop clients that stay silent this long
    #[arg(long)]
    idle_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = ServerConfig {
        address: format!("{}:{}", args.host, args.port),
        grid_size: args.size,
        sea_level: args.sea_level,
        grid_file: args.grid_file,
        save_grid: args.save_grid,
        tick_interval: Duration::from_millis(args.tick_ms),
        initial_units: args.units,
        retention: Retention::Blocks(args.retention),
        max_clients: args.max_clients,
        idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
    };

    info!("Starting server on {}", config.address);
    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
