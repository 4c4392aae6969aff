//! RECSYS API Server Entry Point
//!
//! Startup order: telemetry, configuration, store, cache, topic workers, HTTP. On
//! SIGINT or SIGTERM the server stops accepting requests, then the workers finish their
//! in-flight deliveries within the shutdown timeout.

use std::sync::Arc;
use std::time::Duration;

use recsys_api::constants::AUTH_REQUEST_TIMEOUT_MS;
use recsys_api::telemetry::{init_tracing, TelemetryConfig};
use recsys_api::{
    build_cache_backend, build_event_sources, create_router, drain_workers, ApiError, ApiResult,
    AppConfig, AppState, AuthClient, HttpAuthClient, PgStore,
};
use recsys_engine::{ConsumerRuntime, EventProcessor, QueryService, TracingDeadLetterSink};
use recsys_storage::{RecommendationCache, Store, Timed};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let config = AppConfig::from_env()?;

    let pg = PgStore::connect(&config.db).await?;
    let store: Arc<dyn Store> = Arc::new(Timed::new(pg, config.timeouts.store_timeout));

    let backend = build_cache_backend(&config.service).await?;
    let cache = RecommendationCache::new(backend, config.timeouts.cache_config());

    let processor = Arc::new(EventProcessor::new(
        store.clone(),
        cache.clone(),
        config.processor.clone(),
    ));
    let query = QueryService::new(store.clone(), cache);
    let auth: Arc<dyn AuthClient> = Arc::new(HttpAuthClient::new(
        config.service.auth_url.clone(),
        Duration::from_millis(AUTH_REQUEST_TIMEOUT_MS),
    )?);

    let wiring = build_event_sources(&config.service)?;
    let runtime = ConsumerRuntime::spawn(
        wiring.sources,
        processor,
        Arc::new(TracingDeadLetterSink),
        config.consumer.clone(),
    );
    tracing::info!(topics = ?runtime.topics(), "Topic workers started");

    let mut state = AppState::new(store, query, auth).with_runtime(runtime);
    if let Some(publisher) = wiring.publisher {
        state = state.with_publisher(publisher);
    }
    let runtime_slot = state.runtime.clone();
    let app = create_router(state, config.service.request_timeout);

    let addr = config.service.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "Starting RECSYS API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    drain_workers(&runtime_slot, config.service.shutdown_timeout).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
