//! Server entrypoint: wire configuration, storage, model tiers, and the
//! pipeline together, then serve the API.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use unspend::api::{api_router, ApiContext};
use unspend::cache::ResponseCache;
use unspend::config::AppConfig;
use unspend::db::{open_database, open_memory_database, Store};
use unspend::extraction::{OpenAiClient, TierRouter};
use unspend::pipeline::PipelineRunner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("unspend=info")),
        )
        .init();

    let config = AppConfig::from_env();

    let conn = if config.database.path == ":memory:" {
        open_memory_database()?
    } else {
        open_database(Path::new(&config.database.path))?
    };
    let conn = Arc::new(Mutex::new(conn));

    let store = Store::new(Arc::clone(&conn));
    let cache = Arc::new(ResponseCache::new(conn, config.cache_ttl_secs));
    let client = Arc::new(OpenAiClient::new(&config.model)?);
    let router = Arc::new(TierRouter::new(
        client,
        Arc::clone(&cache),
        config.model.clone(),
        config.recon.clone(),
    ));
    let runner = Arc::new(PipelineRunner::new(
        store.clone(),
        Arc::clone(&router),
        config.clone(),
    ));

    let ctx = ApiContext {
        store,
        router,
        runner,
        cache,
        config: Arc::new(config.clone()),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, db = %config.database.path, "unspend listening");

    axum::serve(listener, api_router(ctx)).await?;
    Ok(())
}
