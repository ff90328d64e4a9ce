//! Secret poller entry point.

use anyhow::Context;
use keyvault_client::{FederatedCredential, SecretClient};
use rust_common::{TracingConfig, init_tracing};
use secret_poller::{Config, SecretPoller, shutdown};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing(&TracingConfig::from_env("secret-poller")).context("failed to initialize tracing")?;

    info!("Starting secret poller");

    let config = Config::from_env().context("invalid configuration")?;

    let credential = FederatedCredential::new(config.credential)
        .context("failed to create federated credential")?;
    let client = SecretClient::new(config.secret_client, Arc::new(credential.clone()))
        .context("failed to create Key Vault client")?;

    info!(vault = %client.vault_url(), secret = %config.poller.secret_name, "Key Vault client ready");

    let poller = SecretPoller::new(Arc::new(client), config.poller);
    let (trigger, signal) = shutdown::channel();

    let poll_task = tokio::spawn(async move { poller.run(signal).await });

    shutdown::wait_for_signal().await;
    trigger.trigger();

    let stats = poll_task.await.context("poller task failed")?;
    info!(
        successes = stats.successes,
        failures = stats.failures,
        token_exchanges = credential.metrics().exchanges.get(),
        token_cache_hits = credential.metrics().cache_hits.get(),
        "Secret poller shut down"
    );

    Ok(())
}
