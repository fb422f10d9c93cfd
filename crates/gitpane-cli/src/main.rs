//! gitpane entry point.
//!
//! ```bash
//! cargo run -p gitpane-cli -- status
//! ```

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gitpane_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default directive.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gitpane=info")))
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    gitpane_cli::run(cli, &mut stdout).await
}
