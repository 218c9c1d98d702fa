pub mod cache_tier;
pub mod config;
pub mod database;

pub use cache_tier::PgCacheTier;
pub use config::DatabaseConfig;
pub use database::Database;
