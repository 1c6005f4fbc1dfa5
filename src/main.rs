// Social Sync Server - optimistic state sync over an in-memory social backend

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use social_sync::{app_state::AppState, config::Config, sync_interface::create_sync_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("social_sync=info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state (hydrates from the snapshot cache)
    let app_state = AppState::new(config.clone()).await?;
    app_state.client.start_sync(config.sync_interval())?;

    // Build main application router
    let app = Router::new()
        .nest("/api/v1/sync", create_sync_router(app_state.clone()))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = config.server_address();
    println!("🚀 Social Sync Server starting on http://{}", addr);
    println!("📋 API Documentation:");
    println!("  GET    /api/v1/sync/state                 - Current store snapshot");
    println!("  GET    /api/v1/sync/stats                 - Coordinator and gateway stats");
    println!("  POST   /api/v1/sync/initialize            - Initial parallel load");
    println!("  POST   /api/v1/sync/posts                 - Add post");
    println!("  GET    /api/v1/sync/posts/{{id}}            - Fetch and select post");
    println!("  PUT    /api/v1/sync/posts/{{id}}            - Update post");
    println!("  DELETE /api/v1/sync/posts/{{id}}            - Remove post");
    println!("  POST   /api/v1/sync/posts/{{id}}/like       - Like post");
    println!("  POST   /api/v1/sync/posts/{{id}}/comments   - Add comment");
    println!("  PUT    /api/v1/sync/comments/{{id}}         - Update comment");
    println!("  DELETE /api/v1/sync/comments/{{id}}         - Remove comment");
    println!("  PUT    /api/v1/sync/users/{{id}}            - Update user");
    println!("  POST   /api/v1/sync/connections           - Request connection");
    println!("  PUT    /api/v1/sync/network               - Replace network graph");
    println!("  PUT    /api/v1/sync/preferences           - Update preferences");
    println!("  POST   /api/v1/sync/cache                 - Save snapshot");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Keep the latest state for the next start
    app_state.client.stop_sync();
    match app_state.cache.save(&app_state.client.snapshot()).await {
        Ok(id) => info!("snapshot {} saved on shutdown", id),
        Err(e) => warn!("failed to save snapshot on shutdown: {}", e),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
    }
}
