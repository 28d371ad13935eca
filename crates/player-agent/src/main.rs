use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signage_gateway_core::config::{load_dotenv, ConfigLoader};
use signage_gateway_player::agent::Agent;
use signage_gateway_player::config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env().context("loading agent configuration")?;
    config.validate().context("validating agent configuration")?;
    info!(
        coordinator = %config.coordinator_url,
        serial = %config.device_serial,
        "starting player agent"
    );

    let agent = Agent::bootstrap(config)
        .await
        .context("bootstrapping agent")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(agent.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    runner.await.context("joining agent runtime")??;
    Ok(())
}
