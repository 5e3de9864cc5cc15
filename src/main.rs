use clap::Parser;
use tracing_subscriber::EnvFilter;

use rotation_chair::cli::Cli;

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug to see every wire command)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    if let Err(e) = rotation_chair::runtime::run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
