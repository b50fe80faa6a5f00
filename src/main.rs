use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use reelsync::api::{create_router, AppState};
use reelsync::config::Config;
use reelsync::db::{create_pg_pool, create_redis_client, PlaybackEventStore, RedisStateStore};
use reelsync::middleware::{make_span_with_session_id, session_id_middleware};
use reelsync::sync::RedisSyncTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelsync=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let pg_pool = create_pg_pool(&config.database_url).await?;
    tracing::info!("Connected to PostgreSQL");

    let redis_client = create_redis_client(&config.redis_url)?;
    tracing::info!("Connected to Redis");

    let event_store = PlaybackEventStore::new(pg_pool);
    let transport = Arc::new(RedisSyncTransport::new(redis_client.clone(), event_store));
    let (state_store, writer_handle) = RedisStateStore::new(redis_client);

    let state = AppState::new(transport, Arc::new(state_store), config.sync_tuning());

    let app = create_router(state)
        .layer(axum::middleware::from_fn(session_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_session_id))
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Sync server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush pending state snapshots before exiting
    writer_handle.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install terminate signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
