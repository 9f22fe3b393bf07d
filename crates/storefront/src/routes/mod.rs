//! HTTP route handlers for the checkout API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                    - Liveness check
//! GET  /health/ready              - Readiness check (database ping)
//!
//! # Checkout
//! POST /checkout/session          - Create a checkout session for a cart
//! POST /checkout/tax              - Calculate tax for a cart and address
//!
//! # Address
//! POST /address/validate          - Verify a shipping address
//!
//! # Orders
//! GET  /orders/{session_id}       - Look up a reconciled order
//!
//! # Webhooks
//! POST /webhooks/stripe           - Payment event reconciliation
//! POST /webhooks/shipping-rates   - Dynamic shipping rates (acknowledge only)
//! ```

pub mod address;
pub mod checkout;
pub mod orders;
pub mod webhook;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the API router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/session", post(checkout::create_session))
        .route("/checkout/tax", post(checkout::calculate_tax))
        .route("/address/validate", post(address::validate))
        .route("/orders/{session_id}", get(orders::get_order))
        .route("/webhooks/stripe", post(webhook::stripe))
        .route("/webhooks/shipping-rates", post(webhook::shipping_rates))
}
