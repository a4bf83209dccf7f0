pub mod config;
pub mod database;
pub mod repository;

pub use config::DatabaseConfig;
pub use database::{CheckpointStats, Database};
pub use repository::{ItemRepository, timestamp_key};
