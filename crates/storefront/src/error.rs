//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server-side errors to
//! Sentry before responding to the client. All route handlers return
//! `Result<T, AppError>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::easypost::EasyPostError;
use crate::stripe::StripeError;

/// Application-level error type for the checkout service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Stripe API operation failed.
    #[error("Stripe error: {0}")]
    Stripe(#[from] StripeError),

    /// EasyPost API operation failed.
    #[error("EasyPost error: {0}")]
    EasyPost(#[from] EasyPostError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Webhook signature rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client (incomplete address, missing fields).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(self, Self::Database(_) | Self::Internal(_) | Self::Stripe(_) | Self::EasyPost(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Money-affecting upstream failures: surface the provider's
            // message so the customer sees why checkout cannot proceed.
            Self::Stripe(StripeError::Api { .. }) => StatusCode::BAD_REQUEST,
            Self::Stripe(_) | Self::EasyPost(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_owned(),
            Self::Stripe(StripeError::Api { message, .. }) => message.clone(),
            Self::Stripe(_) => "Payment service error".to_owned(),
            Self::EasyPost(_) => "Address verification service error".to_owned(),
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
