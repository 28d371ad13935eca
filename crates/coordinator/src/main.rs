use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signage_gateway_core::config::{load_dotenv, ConfigLoader, DatabaseConfig, ServiceConfig};
use signage_gateway_coordinator::context::CoordinatorContext;
use signage_gateway_coordinator::server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let settings = ServiceConfig::from_env().context("loading service configuration")?;
    settings.validate().context("validating service configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let database = DatabaseConfig::from_env().context("loading database configuration")?;
    database.validate().context("validating database configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(database.max_connections)
        .min_connections(database.min_connections)
        .acquire_timeout(database.connect_timeout)
        .connect(&database.url)
        .await
        .context("connecting to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;
    info!("database ready");

    let ctx = CoordinatorContext::postgres(pool, settings);
    server::run(ctx).await.context("running coordinator server")?;
    Ok(())
}
