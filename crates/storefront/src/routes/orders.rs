//! Order lookup route handler.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use opticworks_core::{CheckoutSessionId, Order};

use crate::db::OrderRepository;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Look up a reconciled order by checkout session id.
///
/// GET /orders/{session_id}
///
/// Orders exist only after the webhook reconciler has processed a
/// verified payment event; a 404 here can mean "not yet".
#[instrument(skip(state), fields(session = %session_id))]
pub async fn get_order(
    State(state): State<AppState>,
    Path(session_id): Path<CheckoutSessionId>,
) -> Result<Json<Order>> {
    let order = OrderRepository::new(state.pool())
        .find_by_session(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("order".to_owned()))?;
    Ok(Json(order))
}
