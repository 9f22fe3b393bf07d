//! Stripe webhook route handlers.
//!
//! A delivery is acknowledged with `{"received": true}` only after the
//! signature verifies and the reconciler has durably handled it. A bad
//! or missing signature is rejected before the payload is even parsed,
//! so a forged delivery has no side effects at all.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stripe::webhook::{self, SIGNATURE_HEADER};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn signature_header(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .ok_or_else(|| AppError::BadRequest("missing Stripe-Signature header".to_owned()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("malformed Stripe-Signature header".to_owned()))
}

fn verify(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<()> {
    let signature = signature_header(headers)?;
    let secret = state
        .config()
        .stripe
        .webhook_secret_for(state.config().mode);
    webhook::verify_signature(body, signature, secret, Utc::now().timestamp()).map_err(|e| {
        tracing::warn!(error = %e, "webhook signature rejected");
        AppError::Unauthorized("webhook signature rejected".to_owned())
    })
}

/// Receive a payment event.
///
/// POST /webhooks/stripe
#[instrument(skip_all)]
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>)> {
    verify(&state, &headers, &body)?;

    let event = webhook::parse_event(&body)
        .map_err(|e| AppError::BadRequest(format!("unparseable event payload: {e}")))?;
    let outcome = state
        .reconciler()
        .reconcile(&event)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::debug!(?outcome, "webhook reconciled");

    Ok((StatusCode::OK, Json(WebhookAck { received: true })))
}

/// Receive a shipping-rates event.
///
/// POST /webhooks/shipping-rates
///
/// Dynamic shipping rates are not implemented; the flat-rate rule is
/// applied at session creation. Deliveries are verified and
/// acknowledged so Stripe does not retry them.
#[instrument(skip_all)]
pub async fn shipping_rates(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>)> {
    verify(&state, &headers, &body)?;
    tracing::debug!("shipping-rates event acknowledged without action");
    Ok((StatusCode::OK, Json(WebhookAck { received: true })))
}
