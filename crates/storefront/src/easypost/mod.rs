//! `EasyPost` address verification client.
//!
//! Wraps the `POST /v2/addresses` endpoint with delivery verification
//! enabled and maps the result onto checkout's verification outcomes.
//! Verification is always advisory: a failure here never blocks
//! submission on its own.

pub mod client;

pub use client::EasyPostClient;

use thiserror::Error;

/// Errors that can occur when talking to the `EasyPost` API.
#[derive(Debug, Error)]
pub enum EasyPostError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// `EasyPost` returned an error response.
    #[error("EasyPost API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
