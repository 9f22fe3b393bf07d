//! Address verification route handler.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::instrument;

use opticworks_core::{ShippingAddress, ValidatedAddress};

use crate::checkout::VerificationOutcome;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Verification result, flattened for the client.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidateResponse {
    /// The address verified, possibly with casing normalization.
    Verified { address: ValidatedAddress },
    /// The carrier proposes corrections; nothing is applied until the
    /// customer adopts one.
    Suggestions { suggestions: Vec<ValidatedAddress> },
    /// Verification failed or was unavailable. Advisory only.
    Unverifiable { reasons: Vec<String> },
}

/// Verify a shipping address.
///
/// POST /address/validate
///
/// Incomplete addresses are rejected before any carrier call.
#[instrument(skip(state, address), fields(state_code = %address.state))]
pub async fn validate(
    State(state): State<AppState>,
    Json(address): Json<ShippingAddress>,
) -> Result<Json<ValidateResponse>> {
    if !address.is_complete() {
        return Err(AppError::BadRequest(
            "address is incomplete for verification".to_owned(),
        ));
    }
    let outcome = state.easypost().verify_address(&address).await?;
    Ok(Json(match outcome {
        VerificationOutcome::Verified(address) => ValidateResponse::Verified { address },
        VerificationOutcome::Suggestions(suggestions) => {
            ValidateResponse::Suggestions { suggestions }
        }
        VerificationOutcome::Unverifiable { reasons } => ValidateResponse::Unverifiable { reasons },
    }))
}
