//! HTTP server assembly

use actix_web::{web, App, HttpServer};
use tokio::sync::watch;
use tracing::info;

use crate::api;
use crate::context::CoordinatorContext;
use crate::sweeper;

/// Bind the coordinator and run until the socket closes. The broadcast
/// sweeper runs alongside and is shut down when the server returns.
pub async fn run(ctx: CoordinatorContext) -> std::io::Result<()> {
    let bind_addr = format!("{}:{}", ctx.settings.host, ctx.settings.port);
    let workers = ctx.settings.workers;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = tokio::spawn(sweeper::run_sweeper(
        ctx.broadcasts.clone(),
        ctx.settings.sweep_interval,
        shutdown_rx,
    ));

    let data = web::Data::new(ctx);
    info!(addr = %bind_addr, workers, "coordinator listening");

    let result = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(api::configure)
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await;

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    result
}
