use axum::{
    extract::{Multipart, State},
    response::Html,
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::error::ServiceError;
use crate::model::service::InferenceService;
use crate::preprocessing::image::{decode, to_jpeg_base64};
use crate::server::pages;
use crate::server::types::*;

/// Multipart field carrying the uploaded image.
pub const UPLOAD_FIELD: &str = "file";
const DEFAULT_FILENAME: &str = "upload";

pub async fn index() -> Html<String> {
    Html(pages::index_page(None))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_present: state.store.is_present(),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Html<String>, ServiceError> {
    // 1. Pull the upload out of the form
    let (filename, bytes) = read_upload(multipart).await?;
    debug!(filename = %filename, bytes = bytes.len(), "received upload");

    // 2. Decode, score and re-encode off the async workers
    let service = Arc::clone(&state.service);
    let view = tokio::task::spawn_blocking(move || handle_predict(&service, &bytes, &filename))
        .await
        .map_err(|e| ServiceError::Inference(format!("prediction task failed: {}", e)))??;

    Ok(Html(pages::result_page(&view)))
}

/// One synchronous pass over an upload: decode, score, re-encode for display.
/// Undecodable bytes fail with `Decode` before the model is touched.
pub fn handle_predict(
    service: &InferenceService,
    raw_bytes: &[u8],
    filename: &str,
) -> Result<PredictionView, ServiceError> {
    let img = decode(raw_bytes)?;

    let start = Instant::now();
    let prediction = service.predict(&img)?;
    let elapsed = start.elapsed();

    metrics::histogram!("crackscope_inference_seconds", elapsed.as_secs_f64());
    metrics::counter!("crackscope_predictions_total", 1, "label" => prediction.verdict.as_str());
    debug!(
        filename,
        label = prediction.verdict.as_str(),
        p_crack = prediction.p_crack,
        inference_ms = elapsed.as_secs_f64() * 1000.0,
        "scored upload"
    );

    Ok(PredictionView {
        filename: filename.to_string(),
        label: prediction.verdict.as_str(),
        p_crack: format!("{:.3}", prediction.p_crack),
        img_b64: to_jpeg_base64(&img)?,
    })
}

async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), ServiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Upload(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::Upload(e.body_text()))?;

        return Ok((filename, bytes.to_vec()));
    }

    Err(ServiceError::Upload(format!(
        "missing `{}` field in form",
        UPLOAD_FIELD
    )))
}
