//! Wire types for the Stripe API surfaces checkout uses.

use std::collections::HashMap;

use serde::Deserialize;

use opticworks_core::{CustomerId, PaymentIntentId};

/// A Stripe customer record.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Paginated list envelope.
#[derive(Debug, Deserialize)]
pub struct List<T> {
    pub data: Vec<T>,
}

/// Status of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

/// A payment intent, Stripe's record of one payment attempt.
///
/// `metadata` carries the order snapshot written at creation time:
/// `items` (JSON array), `subtotal`, `shipping`, and optionally `tax`,
/// so the webhook reconciler can rebuild the order without a session
/// store lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    /// Amount in the currency's smallest unit (cents for USD).
    pub amount: i64,
    pub currency: String,
    pub status: PaymentIntentStatus,
    pub client_secret: Option<String>,
    pub customer: Option<CustomerId>,
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
    #[serde(default)]
    pub shipping: Option<ShippingDetails>,
}

/// The error recorded on a failed payment attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentError {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Shipping block attached to a payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct ShippingDetails {
    pub name: Option<String>,
    pub address: Option<StripeAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// Result of a tax calculation.
#[derive(Debug, Clone, Deserialize)]
pub struct TaxCalculation {
    pub id: String,
    /// Tax owed, in the currency's smallest unit.
    pub tax_amount_exclusive: i64,
    pub currency: String,
}

/// Error envelope Stripe wraps failures in.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub message: Option<String>,
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
}
