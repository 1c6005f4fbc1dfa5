// Social Sync - optimistic client-side state synchronization for a social network

// Core primitives - temporary ids and keyed locks
pub mod core;

// Entity model and typed requests
pub mod models;

// State container and derived views
pub mod store;

// Remote procedure gateway, in-memory backend and decorators
pub mod gateway;

// Optimistic mutation coordinators
pub mod coordinator;

// Session client, snapshot cache and HTTP surface
pub mod client;
pub mod persistence;
pub mod sync_interface;
pub mod app_state;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use client::SocialClient;
pub use error::{AppError, AppResult};
pub use store::{Store, StoreMutation, StoreSnapshot};
