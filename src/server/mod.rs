pub mod handlers;
pub mod pages;
pub mod routes;
pub mod types;
