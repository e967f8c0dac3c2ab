pub mod auth;
pub mod config;
pub mod error;
pub mod feedback; // recommender client
pub mod models;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod service;
pub mod tx; // unit-of-work coordinator

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use service::PostService;
pub use tx::TxCoordinator;
