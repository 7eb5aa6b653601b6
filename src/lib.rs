pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{AppError, AppResult};

// Export logic types
pub use logic::{
    AppContext, HookDispatcher, HookEvent, QueryParams, RequestContext, Settings, TxOutcome,
    UseCase, WriteMode,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryCache, MemoryStore, PostgresStore, ResponseCache, Store};

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    app: Arc<AppContext>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = api::routes::create_router(app);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Load configuration, build the application context and serve until Ctrl-C.
pub async fn run_server() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let config = config::AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{} backend={:?}",
        config.server.host,
        config.server.port,
        config.database.backend
    );

    let app = Arc::new(AppContext::from_config(&config).await?);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("survey-db server running on http://{}", bind_address);

    let result = serve(listener, app.clone(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for shutdown signal: {}", e);
        }
        log::info!("shutting down");
    })
    .await;

    app.shutdown().await;
    result
}
