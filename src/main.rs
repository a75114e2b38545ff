//! Jewelry storefront commerce service

use anyhow::{Context, Result};
use jewelry_commerce::api::{self, AppState};
use jewelry_commerce::config::AppConfig;
use jewelry_commerce::events::EventBus;
use jewelry_commerce::store::{MemoryStore, PgStore, Store};
use jewelry_commerce::Product;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, config.database_max_connections).await.context("connecting to Postgres")?;
            pg.migrate().await.context("running migrations")?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(path) = &config.seed_catalog {
        let seeded = seed_catalog(store.as_ref(), path).await?;
        tracing::info!(products = seeded, path = %path.display(), "catalog seeded");
    }

    let events = EventBus::connect(config.nats_url.as_deref()).await;
    let state = AppState::new(store, events, config.pricing(), config.order_settings());
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!("jewelry-commerce listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn seed_catalog(store: &dyn Store, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path).await.with_context(|| format!("reading {}", path.display()))?;
    let products: Vec<Product> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    for product in &products {
        store.upsert_product(product).await.with_context(|| format!("seeding {}", product.sku))?;
    }
    Ok(products.len())
}
