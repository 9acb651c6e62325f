use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries one line per event.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "starclient", "starclient {} starting: RUST_LOG='{}'", env!("CARGO_PKG_VERSION"), rust_log);

    starclient::cli::run(std::env::args().collect()).await
}
