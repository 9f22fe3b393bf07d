//! Finalized order records.
//!
//! Orders are created by the webhook reconciler after a verified
//! payment-succeeded event; nothing upstream of the reconciler writes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::ShippingAddress;
use super::cart::CartItem;
use super::email::Email;
use super::id::{CheckoutSessionId, PaymentIntentId};
use super::price::Price;

/// Human-facing order reference, `ORD-<unix millis>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Generate an order number from the current time.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(format!("ORD-{}", now.timestamp_millis()))
    }

    /// The order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OrderNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// A finalized order as persisted by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_number: OrderNumber,
    /// Payment-intent id; doubles as the idempotency key for order writes.
    pub payment_intent: PaymentIntentId,
    /// Checkout session the payment belonged to, when known.
    pub checkout_session: Option<CheckoutSessionId>,
    pub customer_email: Email,
    pub customer_name: String,
    pub items: Vec<CartItem>,
    pub subtotal: Price,
    pub tax: Price,
    pub shipping: Price,
    pub total: Price,
    pub shipping_address: Option<ShippingAddress>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_number_format() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).single().expect("valid ts");
        assert_eq!(OrderNumber::generate(now).as_str(), "ORD-1700000000123");
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [OrderStatus::Pending, OrderStatus::Completed, OrderStatus::Failed] {
            let parsed: OrderStatus = status.to_string().parse().expect("parse");
            assert_eq!(parsed, status);
        }
        assert!("voided".parse::<OrderStatus>().is_err());
    }
}
