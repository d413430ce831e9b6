//! CloutScape pricing library
//!
//! Scrapes competitor gold prices, derives our sale price and keeps it
//! fresh. Exposed as a library for the binary and for tests.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod pricing;
pub mod repositories;
pub mod services;
pub mod websocket;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};
