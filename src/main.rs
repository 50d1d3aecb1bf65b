use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use diff_digest::config::Config;
use diff_digest::server::{ServerConfig, start_server};

#[derive(Parser)]
#[command(name = "diff-digest")]
#[command(version, about = "Turn merged-PR diffs into developer and marketing release notes")]
struct Cli {
    /// Port to serve on
    #[arg(short, long, default_value = "3141")]
    port: u16,

    /// Notes database path
    #[arg(long, default_value = ".digest/notes.db")]
    db_path: PathBuf,

    /// Enable dev mode (bind all interfaces, permissive CORS)
    #[arg(long)]
    dev: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let server = ServerConfig {
        port: cli.port,
        db_path: cli.db_path,
        dev_mode: cli.dev,
    };
    start_server(server, Config::from_env()).await
}
