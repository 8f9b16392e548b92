use std::sync::Arc;

use cinerank::{
    api::{create_router, AppState},
    config::Config,
    db::{create_pool, movielens, InMemoryRatingStore, PgRatingStore, RatingStore},
    services::RecommendationService,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cinerank=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let catalogue = Arc::new(movielens::load_catalogue(&config.data_dir).await?);
    let store = open_store(&config).await?;

    let service = Arc::new(RecommendationService::new(
        store,
        catalogue,
        config.service()?,
    ));
    service.reload().await?;

    let sweeper =
        service.spawn_cache_sweeper(config.cache_sweep_interval(), config.cache_retention_ceiling());

    let app = create_router(AppState::new(service));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown().await;
    Ok(())
}

/// Postgres when a database URL is configured, otherwise memory seeded from `u.data`
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn RatingStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgRatingStore::new(create_pool(url).await?).await?;
            if store.count().await? == 0 {
                let ratings = movielens::load_ratings(&config.data_dir).await?;
                store.import(&ratings).await?;
            }
            Ok(Arc::new(store))
        }
        None => {
            let ratings = movielens::load_ratings(&config.data_dir).await?;
            Ok(Arc::new(InMemoryRatingStore::with_ratings(ratings)))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
