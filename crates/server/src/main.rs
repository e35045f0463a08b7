use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use parley_server::{tcp, ServerState};
use parley_shared::config;

#[derive(Parser)]
#[command(name = "parley-server", about = "parley voice chat control server")]
pub struct Args {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Control TCP port
    #[arg(long, default_value_t = config::CONTROL_PORT)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let directive = format!("parley_server={}", args.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("parley-server listening on {}", addr);

    tcp::run_control_server(ServerState::new(), listener).await
}
