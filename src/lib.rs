pub mod backoff;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod operator;
pub mod poll;
pub mod preset;
pub mod provision;
pub mod reconciler;
pub mod recover;
pub mod retry;
pub mod status;
pub mod sync;
mod wait;

pub use config::Config;
pub use error::ReconcileError;
pub use operator::*;
pub use provision::Provisioner;

use crate::client::ApiClientBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    log::info!("Config: {config:#?}");

    let Config {
        operator: config,
        reconciler,
    } = config;
    let interval = config.interval();

    let api = ApiClientBuilder::from_url(config.api)
        .token(config.token.map(|token| token.into_inner()))
        .insecure_tls(config.insecure_tls)
        .build()?;
    log::info!("API client: {api:?}");

    let provisioner = Provisioner::new(Arc::new(api), reconciler, cancel.clone());

    log::info!("Starting operator");

    Operator::new(provisioner, config.objects, interval, cancel)
        .run()
        .await;

    Ok(())
}
