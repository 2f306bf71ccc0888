use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hci_runtime::config::{HCI_BAUD, LOOP_HZ};
use hci_runtime::runtime::{self, RunOptions};

/// Serial command runtime for the robot's motors and sensors
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Robot description (sensors, motors, boards)
    #[arg(short, long, default_value = "config/robot.json")]
    config: PathBuf,

    /// Serial port the host commands arrive on
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(short, long, default_value_t = HCI_BAUD)]
    baud: u32,

    /// Maintenance cycle rate
    #[arg(long, default_value_t = LOOP_HZ, value_parser = clap::value_parser!(u64).range(1..=1000))]
    hz: u64,

    /// Zero set-points after this long without set-outputs (0 disables)
    #[arg(long, default_value_t = 500)]
    cmd_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for per-write detail)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let opts = RunOptions {
        config: args.config,
        port: args.port,
        baud: args.baud,
        loop_hz: args.hz,
        cmd_timeout: Duration::from_millis(args.cmd_timeout_ms),
    };

    if let Err(e) = runtime::run(opts).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
