use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use ndarray::ShapeError;
use thiserror::Error;

use crate::server::pages;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to fetch model from {url}: {source}")]
    ModelFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to store model at {path}: {source}")]
    ModelStore {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model not found at path: {0}")]
    ModelNotFound(String),

    #[error("Invalid model artifact: {0}")]
    Artifact(String),

    #[error("Invalid upload: {0}")]
    Upload(String),

    #[error("Could not read image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Could not encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Decode(_) | ServiceError::Upload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_client_error() {
            metrics::counter!("crackscope_rejected_uploads_total", 1);
            tracing::debug!(error = %self, "rejected upload");
            self.to_string()
        } else {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        };

        (status, Html(pages::index_page(Some(&message)))).into_response()
    }
}
