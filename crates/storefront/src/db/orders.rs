//! Order repository.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use sqlx::postgres::PgRow;

use opticworks_core::{
    CheckoutSessionId, Email, EventId, Order, PaymentIntentId, Price,
};

use super::RepositoryError;
use crate::services::reconciler::OrderStore;

/// Repository for reconciled orders and webhook idempotency records.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Record that a webhook delivery has been handled.
    ///
    /// Returns `false` when the event id was already recorded, which is
    /// how redeliveries are detected durably.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn mark_event_processed(&self, event: &EventId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO storefront.processed_events (event_id)
            VALUES ($1)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(event.as_str())
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Insert an order, keyed by payment-intent id.
    ///
    /// Returns `false` when an order for that payment intent already
    /// exists; the insert is a no-op in that case.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if serialization or the
    /// insert fails.
    pub async fn insert_order(&self, order: &Order) -> Result<bool, RepositoryError> {
        let items = serde_json::to_value(&order.items)
            .map_err(|e| RepositoryError::DataCorruption(format!("unserializable items: {e}")))?;
        let shipping_address = order
            .shipping_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepositoryError::DataCorruption(format!("unserializable address: {e}")))?;

        let result = sqlx::query(
            r"
            INSERT INTO storefront.orders (
                order_number, payment_intent_id, checkout_session_id,
                customer_email, customer_name, items,
                subtotal, tax, shipping, total,
                shipping_address, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (payment_intent_id) DO NOTHING
            ",
        )
        .bind(order.order_number.as_str())
        .bind(order.payment_intent.as_str())
        .bind(order.checkout_session.as_ref().map(CheckoutSessionId::as_str))
        .bind(order.customer_email.as_str())
        .bind(&order.customer_name)
        .bind(items)
        .bind(order.subtotal.amount())
        .bind(order.tax.amount())
        .bind(order.shipping.amount())
        .bind(order.total.amount())
        .bind(shipping_address)
        .bind(order.status.to_string())
        .bind(order.created_at)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Look up an order by checkout session or payment-intent id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails, or
    /// `RepositoryError::DataCorruption` if a stored row cannot be
    /// mapped back to an order.
    pub async fn find_by_session(
        &self,
        session: &CheckoutSessionId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT order_number, payment_intent_id, checkout_session_id,
                   customer_email, customer_name, items,
                   subtotal, tax, shipping, total,
                   shipping_address, status, created_at
            FROM storefront.orders
            WHERE checkout_session_id = $1 OR payment_intent_id = $1
            ",
        )
        .bind(session.as_str())
        .fetch_optional(self.pool)
        .await?;
        row.map(map_order).transpose()
    }
}

/// Owned handle over the pool, implementing the reconciler's storage
/// port.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OrderStore for PgOrderStore {
    async fn mark_event_processed(&self, event: &EventId) -> Result<bool, RepositoryError> {
        OrderRepository::new(&self.pool).mark_event_processed(event).await
    }

    async fn insert_order(&self, order: &Order) -> Result<bool, RepositoryError> {
        OrderRepository::new(&self.pool).insert_order(order).await
    }
}

fn map_order(row: PgRow) -> Result<Order, RepositoryError> {
    let email_raw: String = row.try_get("customer_email")?;
    let customer_email = Email::parse(&email_raw)
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid email in database: {e}")))?;
    let items: serde_json::Value = row.try_get("items")?;
    let items = serde_json::from_value(items)
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid items in database: {e}")))?;
    let shipping_address: Option<serde_json::Value> = row.try_get("shipping_address")?;
    let shipping_address = shipping_address
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid address in database: {e}")))?;
    let status_raw: String = row.try_get("status")?;
    let status = status_raw
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("{e}")))?;

    Ok(Order {
        order_number: row.try_get::<String, _>("order_number")?.into(),
        payment_intent: PaymentIntentId::new(row.try_get::<String, _>("payment_intent_id")?),
        checkout_session: row
            .try_get::<Option<String>, _>("checkout_session_id")?
            .map(CheckoutSessionId::new),
        customer_email,
        customer_name: row.try_get("customer_name")?,
        items,
        subtotal: Price::new(row.try_get::<Decimal, _>("subtotal")?),
        tax: Price::new(row.try_get::<Decimal, _>("tax")?),
        shipping: Price::new(row.try_get::<Decimal, _>("shipping")?),
        total: Price::new(row.try_get::<Decimal, _>("total")?),
        shipping_address,
        status,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}
