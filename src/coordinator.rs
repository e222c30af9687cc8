use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::verifier::Verifier;

/// Run the coordinator: connect the store, spawn the scheduler loop and
/// serve the HTTP API until the shutdown token fires.
pub async fn run(config: CoordinatorConfig, shutdown: CancellationToken) -> Result<()> {
    let store = Store::connect(&config.database_url).await?;
    tracing::info!(database_url = %config.database_url, "Database connected");

    let verifier = Verifier::new(store.clone());
    let scheduler = Scheduler::new(store.clone(), verifier);
    let scheduler_shutdown = shutdown.clone();
    tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let state = AppState::new(store);
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(addr = %addr, "Coordinator API listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Coordinator stopped");
    Ok(())
}
