//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::config::StorefrontConfig;
use crate::db::PgOrderStore;
use crate::easypost::{EasyPostClient, EasyPostError};
use crate::services::{Reconciler, ResendClient, ResendError};
use crate::stripe::{StripeClient, StripeError, StripeGateway};

/// Error building the application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("stripe client: {0}")]
    Stripe(#[from] StripeError),
    #[error("easypost client: {0}")]
    EasyPost(#[from] EasyPostError),
    #[error("resend client: {0}")]
    Resend(#[from] ResendError),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    stripe: StripeClient,
    gateway: StripeGateway,
    easypost: EasyPostClient,
    reconciler: Reconciler<PgOrderStore, ResendClient, StripeClient>,
}

impl AppState {
    /// Build the state: API clients, payment gateway, and the webhook
    /// reconciler, all sharing the configuration and pool.
    ///
    /// # Errors
    ///
    /// Returns an error if any HTTP client cannot be built.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let timeout = config.checkout.http_timeout;
        let stripe = StripeClient::new(config.stripe.secret_key.clone(), timeout)?;
        let gateway = StripeGateway::new(
            stripe.clone(),
            config.checkout.clone(),
            config.base_url.clone(),
        );
        let easypost = EasyPostClient::new(config.easypost.api_key.clone(), timeout)?;
        let email = ResendClient::new(&config.email)?;
        let reconciler = Reconciler::new(
            PgOrderStore::new(pool.clone()),
            email,
            stripe.clone(),
            config.base_url.clone(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                stripe,
                gateway,
                easypost,
                reconciler,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn stripe(&self) -> &StripeClient {
        &self.inner.stripe
    }

    #[must_use]
    pub fn gateway(&self) -> &StripeGateway {
        &self.inner.gateway
    }

    #[must_use]
    pub fn easypost(&self) -> &EasyPostClient {
        &self.inner.easypost
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler<PgOrderStore, ResendClient, StripeClient> {
        &self.inner.reconciler
    }
}
