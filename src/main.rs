use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use watchmark::{app, cli};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = cli::Cli::parse();
    app::run(cli).await
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("WATCHMARK_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
