use anyhow::Context;
use crackscope::{config, model, observability, server};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Init
    observability::init_tracing();
    let metrics = observability::install_metrics().context("installing metrics recorder")?;

    // 2. Load Config
    let config = config::AppConfig::load()?;

    // 3. Make sure the artifact is on disk, then load it once
    let store = model::store::ModelStore::from_config(&config.model);
    store
        .ensure_available()
        .await
        .context("model artifact unavailable")?;

    model::loader::init_ort().context("initializing ONNX Runtime")?;
    let service = model::service::InferenceService::load(store.path(), &config.model)
        .with_context(|| format!("loading model from {}", store.path().display()))?;

    // 4. Create Router
    let state = server::types::AppState {
        service: Arc::new(service),
        store,
        metrics,
    };
    let app = server::routes::create_router(state, config.server.max_upload_bytes);

    // 5. Bind & Serve
    let listener =
        TcpListener::bind(format!("{}:{}", config.server.host, config.server.port)).await?;
    info!(
        "Server listening on http://{}:{}",
        config.server.host, config.server.port
    );

    axum::serve(listener, app).await?;

    Ok(())
}
