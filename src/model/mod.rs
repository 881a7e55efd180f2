pub mod artifact;
pub mod loader;
pub mod portable_path;
pub mod service;
pub mod store;
