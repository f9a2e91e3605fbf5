use clap::Parser;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::RobotConfig;

#[derive(Parser)]
#[command(name = "swerve-zenoh-runtime")]
#[command(about = "Four-wheel swerve base runtime over Zenoh")]
struct Args {
    /// JSON config file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Serial port for the servo bus, overrides the config file
    #[arg(short, long)]
    port: Option<String>,

    /// Run with simulated modules instead of hardware
    #[arg(long)]
    sim: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RobotConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => RobotConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    if let Err(e) = swerve_zenoh_runtime::runtime::run(config, args.sim).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
