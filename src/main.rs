use axum::routing::get;
use axum::Router;
use tracing_subscriber::EnvFilter;

use hero_registry::api;
use hero_registry::config::Config;
use hero_registry::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Storage backend: {:?} (index {}, metadata {})",
        config.backend,
        config.hero_index,
        config.meta_index
    );

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/api/health", get(api::heroes::health))
        .route(
            "/api/heroes",
            get(api::heroes::list_heroes).post(api::heroes::add_hero),
        )
        .route(
            "/api/heroes/{reference}",
            get(api::heroes::get_hero)
                .patch(api::heroes::edit_hero)
                .delete(api::heroes::delete_hero),
        )
        .route("/api/ranking/audit", get(api::heroes::audit_ranking))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
