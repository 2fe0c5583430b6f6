//! Crossbar Database Crate
//!
//! SQLite persistence for the relay state that may outlive a restart: the
//! correlation window, per-user preferences and channel welcome texts.

use crossbar_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::{prepare_database, DatabaseConnection};
pub use migrations::run_migrations;

pub use repos::{CorrelationRepository, PreferenceRepository, WelcomeRepository};

pub use entities::{ChannelWelcome, CorrelationRow, OriginRef, UserPreferenceRecord};

pub use types::{DatabaseError, DatabaseResult};

pub use sqlx::Pool;

/// Open the pool and bring the schema up to date.
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
