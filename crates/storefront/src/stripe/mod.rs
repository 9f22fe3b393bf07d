//! Stripe payment API client.
//!
//! Covers the surfaces checkout needs: customers, payment intents, tax
//! calculations, and webhook event verification. Requests use Stripe's
//! form-encoded API; responses are deserialized from JSON.

pub mod client;
pub mod gateway;
pub mod types;
pub mod webhook;

pub use client::StripeClient;
pub use gateway::StripeGateway;
pub use types::{Customer, PaymentIntent, PaymentIntentStatus, TaxCalculation};
pub use webhook::{SignatureError, WebhookEvent, verify_signature};

use thiserror::Error;

/// Errors that can occur when interacting with the Stripe API.
#[derive(Debug, Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe returned an error response.
    #[error("Stripe API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Stripe's error code, e.g. `card_declined`.
        code: Option<String>,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Webhook payload failed signature verification.
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),
}
