// Social network backend - relational data model and request handlers

// Shared application state
pub mod app_state;

// Session authentication and password hashing
pub mod auth;

// Count caching
pub mod cache;

// Configuration from environment
pub mod config;

// SQLite storage layer
pub mod database;

// HTTP request handlers and router
pub mod handlers;

// Entity and page types
pub mod models;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
