use crate::model::{service::InferenceService, store::ModelStore};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;

/// Shared Application State
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InferenceService>,
    pub store: ModelStore,
    pub metrics: PrometheusHandle,
}

/// What the result page shows for one scored upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionView {
    pub filename: String,
    pub label: &'static str,
    /// Positive-class probability, three decimals.
    pub p_crack: String,
    /// Base64 JPEG of the upload.
    pub img_b64: String,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_present: bool,
}
