pub mod price_history_repository;

// Re-export all repositories for convenient access
pub use price_history_repository::{HistoryStore, PriceHistoryRepository};
