pub mod auth;
pub mod cache;
pub mod error;
pub mod feed;
pub mod models;
pub mod openapi;
pub mod policy;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
