use anyhow::Context;
use provision_operator::{config, run};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::var("OPERATOR_CONFIG").unwrap_or_else(|_| "operator.yaml".to_string());
    let config = config::load(&path).context("Failed to load configuration")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Shutting down");
                shutdown.cancel();
            }
            Err(err) => log::warn!("Unable to listen for shutdown signal: {err}"),
        }
    });

    run(config, cancel).await
}
