//! proxlessd — the Proxless daemon.
//!
//! Single binary that assembles all Proxless subsystems:
//! - Route index (optionally replicated through Redis)
//! - Scale controller + idle sweep
//! - Request router and proxy listener
//! - Admin API (push-based discovery)
//! - Routes file discovery
//!
//! # Usage
//!
//! ```text
//! proxlessd --port 80 --api-port 8081 --routes-file /etc/proxless/routes.toml
//! ```
//!
//! Every flag can also be set through the environment variable shown in
//! `proxlessd --help`.

mod cli;
mod daemon;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);
    daemon::run(cli).await
}

/// `RUST_LOG` wins over `--log-level`.
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
