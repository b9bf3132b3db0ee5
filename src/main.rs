use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crawld::cli::{parse_cli, run_with_cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_cli();

    // RUST_LOG takes precedence over the CLI flag.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    run_with_cli(cli).await
}
