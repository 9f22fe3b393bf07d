//! Database operations for the storefront `PostgreSQL`.
//!
//! # Database: `opticworks_storefront`
//!
//! Stripe is the source of truth for payments; the database holds what
//! checkout itself is accountable for:
//!
//! ## Tables
//!
//! - `orders` - Orders reconciled from verified webhook events, keyed by
//!   payment-intent id
//! - `processed_events` - Webhook deliveries already handled, the durable
//!   half of idempotency
//!
//! # Migrations
//!
//! Migrations live in `crates/storefront/migrations/` and run at startup
//! via `sqlx::migrate!`.

pub mod orders;

pub use orders::{OrderRepository, PgOrderStore};

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,
}
