pub mod config;
pub mod error;
pub mod model;
pub mod observability;
pub mod preprocessing;
pub mod server;


// Re-export common types
pub use error::ServiceError;
pub use model::service::{InferenceService, Prediction, Verdict};
pub use model::store::ModelStore;
