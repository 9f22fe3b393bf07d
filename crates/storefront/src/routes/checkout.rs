//! Checkout session and tax route handlers.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use opticworks_core::{CartItem, CheckoutSessionId, Price, ShippingAddress};

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Request to open a checkout session.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub items: Vec<CartItem>,
}

/// A newly created checkout session.
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: CheckoutSessionId,
    /// Authorizes the browser to mount the payment capture surface.
    pub client_secret: String,
    pub subtotal: Price,
    pub shipping: Price,
}

/// Create a checkout session for a cart.
///
/// POST /checkout/session
#[instrument(skip(state, request), fields(item_count = request.items.len()))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>> {
    if request.items.is_empty() {
        return Err(AppError::BadRequest("cart is empty".to_owned()));
    }
    if request.items.iter().any(|item| item.quantity == 0) {
        return Err(AppError::BadRequest(
            "line item quantities must be at least 1".to_owned(),
        ));
    }

    let subtotal: Price = request.items.iter().map(CartItem::line_total).sum();
    if subtotal.is_negative() {
        return Err(AppError::BadRequest("cart total is negative".to_owned()));
    }
    let shipping = state.gateway().shipping_for(subtotal);
    let intent = state
        .stripe()
        .create_payment_intent(&request.items, subtotal, shipping)
        .await?;
    let client_secret = intent
        .client_secret
        .ok_or_else(|| AppError::Internal("payment intent missing client secret".to_owned()))?;

    tracing::info!(intent = %intent.id, %subtotal, %shipping, "checkout session created");
    Ok(Json(CreateSessionResponse {
        session_id: crate::stripe::client::session_id_for(&intent.id),
        client_secret,
        subtotal,
        shipping,
    }))
}

/// Request to calculate tax for a cart shipped to an address.
#[derive(Debug, Deserialize)]
pub struct TaxRequest {
    pub items: Vec<CartItem>,
    pub address: ShippingAddress,
}

#[derive(Debug, Serialize)]
pub struct TaxResponse {
    pub tax: Price,
}

/// Calculate sales tax.
///
/// POST /checkout/tax
///
/// A calculation failure is an error response, never a zero amount;
/// the client blocks submission until a retry succeeds.
#[instrument(skip(state, request), fields(state_code = %request.address.state))]
pub async fn calculate_tax(
    State(state): State<AppState>,
    Json(request): Json<TaxRequest>,
) -> Result<Json<TaxResponse>> {
    if request.items.is_empty() {
        return Err(AppError::BadRequest("cart is empty".to_owned()));
    }
    if !request.address.is_complete() {
        return Err(AppError::BadRequest(
            "address is incomplete for tax calculation".to_owned(),
        ));
    }
    let calculation = state
        .stripe()
        .calculate_tax(&request.items, &request.address)
        .await?;
    Ok(Json(TaxResponse {
        tax: Price::from_cents(calculation.tax_amount_exclusive),
    }))
}
