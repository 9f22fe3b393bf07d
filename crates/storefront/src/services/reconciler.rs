//! Webhook reconciliation.
//!
//! Turns verified Stripe events into durable order records and
//! transactional email. Redelivered events must be harmless, so
//! idempotency is enforced twice: a fast-path cache of recently seen
//! event ids, and `ON CONFLICT DO NOTHING` inserts keyed by event id
//! and payment-intent id underneath it. The event id is recorded only
//! after the side effects succeed, so a failed delivery stays eligible
//! for redelivery. Only a database failure is surfaced to the caller;
//! everything else acknowledges the delivery.

use std::sync::Arc;

use chrono::Utc;
use moka::future::Cache;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::instrument;

use opticworks_core::{
    CartItem, CustomerId, Email, EventId, Order, OrderNumber, OrderStatus, Price, ShippingAddress,
};

use crate::db::RepositoryError;
use crate::stripe::StripeClient;
use crate::stripe::client::{retry_url, session_id_for};
use crate::stripe::types::PaymentIntent;
use crate::stripe::webhook::WebhookEvent;

use super::email::{EmailSender, PaymentFailedNotice};

/// How many recently seen event ids the fast path remembers.
const SEEN_EVENTS_CAPACITY: u64 = 10_000;

/// How long a seen event id stays in the fast path. Stripe retries for
/// up to three days; the durable table covers the rest.
const SEEN_EVENTS_TTL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Durable order storage, as the reconciler sees it.
pub trait OrderStore: Send + Sync + 'static {
    /// Record a handled event id. `false` means it was already recorded.
    fn mark_event_processed(
        &self,
        event: &EventId,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Insert an order. `false` means an order for that payment intent
    /// already exists.
    fn insert_order(&self, order: &Order)
    -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}

impl<T: OrderStore> OrderStore for Arc<T> {
    async fn mark_event_processed(&self, event: &EventId) -> Result<bool, RepositoryError> {
        (**self).mark_event_processed(event).await
    }

    async fn insert_order(&self, order: &Order) -> Result<bool, RepositoryError> {
        (**self).insert_order(order).await
    }
}

/// Customer email lookup for intents that carry only a customer id.
pub trait CustomerDirectory: Send + Sync + 'static {
    /// The email on the customer record, if any. Lookup failures are
    /// swallowed; the caller falls through to the next source.
    fn customer_email(&self, customer: &CustomerId) -> impl Future<Output = Option<Email>> + Send;
}

impl<T: CustomerDirectory> CustomerDirectory for Arc<T> {
    async fn customer_email(&self, customer: &CustomerId) -> Option<Email> {
        (**self).customer_email(customer).await
    }
}

impl CustomerDirectory for StripeClient {
    async fn customer_email(&self, customer: &CustomerId) -> Option<Email> {
        match self.retrieve_customer(customer).await {
            Ok(record) => record.email.and_then(|raw| raw.parse().ok()),
            Err(e) => {
                tracing::warn!(customer = %customer, error = %e, "customer lookup failed");
                None
            }
        }
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First delivery; side effects ran.
    Processed,
    /// Seen before; nothing ran.
    Duplicate,
    /// An event type checkout does not act on, or a payload missing the
    /// data to act with. Acknowledged so Stripe stops retrying.
    Ignored,
}

/// Errors the reconciler surfaces to the webhook route.
///
/// Only failures a retry can fix belong here; Stripe redelivers on a
/// non-2xx response.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Database(#[from] RepositoryError),
}

/// Reconciles verified webhook events into orders and email.
pub struct Reconciler<S, E, C> {
    store: S,
    email: E,
    customers: C,
    seen_events: Cache<String, ()>,
    base_url: String,
}

impl<S: OrderStore, E: EmailSender, C: CustomerDirectory> Reconciler<S, E, C> {
    #[must_use]
    pub fn new(store: S, email: E, customers: C, base_url: String) -> Self {
        Self {
            store,
            email,
            customers,
            seen_events: Cache::builder()
                .max_capacity(SEEN_EVENTS_CAPACITY)
                .time_to_live(SEEN_EVENTS_TTL)
                .build(),
            base_url,
        }
    }

    /// Handle one verified event.
    ///
    /// # Errors
    ///
    /// Returns `ReconcilerError::Database` when the durable side of
    /// idempotency or the order insert fails; the route answers non-2xx
    /// and Stripe redelivers.
    #[instrument(skip(self, event), fields(event_id = %event.id()))]
    pub async fn reconcile(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, ReconcilerError> {
        let event_id = event.id().clone();
        if self.seen_events.contains_key(event_id.as_str()) {
            tracing::debug!("duplicate delivery, fast path");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let outcome = match event {
            WebhookEvent::PaymentSucceeded { intent, .. } => {
                self.on_payment_succeeded(intent).await?
            }
            WebhookEvent::PaymentFailed { intent, .. } => self.on_payment_failed(intent).await,
            WebhookEvent::Ignored { event_type, .. } => {
                tracing::debug!(event_type, "event type not handled");
                ReconcileOutcome::Ignored
            }
        };

        // The event id is recorded only once the side effects stood. A
        // failure above leaves it unrecorded, so Stripe's redelivery
        // reruns the handler; the order insert is keyed by payment
        // intent, so a rerun cannot double up.
        let first = self.store.mark_event_processed(&event_id).await?;
        self.seen_events.insert(event_id.as_str().to_owned(), ()).await;
        if first {
            Ok(outcome)
        } else {
            tracing::debug!("duplicate delivery, durable path");
            Ok(ReconcileOutcome::Duplicate)
        }
    }

    async fn on_payment_succeeded(
        &self,
        intent: &PaymentIntent,
    ) -> Result<ReconcileOutcome, ReconcilerError> {
        let Some(email) = self.email_for(intent).await else {
            tracing::error!(intent = %intent.id, "payment succeeded but no customer email found");
            sentry::capture_message(
                &format!("no customer email on {}", intent.id),
                sentry::Level::Error,
            );
            return Ok(ReconcileOutcome::Ignored);
        };
        let Some(order) = order_from_intent(intent, email) else {
            // Not retryable: the metadata is wrong at the source.
            tracing::error!(intent = %intent.id, "payment succeeded but order snapshot is unusable");
            sentry::capture_message(
                &format!("unusable order snapshot on {}", intent.id),
                sentry::Level::Error,
            );
            return Ok(ReconcileOutcome::Ignored);
        };

        let inserted = self.store.insert_order(&order).await?;
        if !inserted {
            tracing::info!(intent = %intent.id, "order already recorded");
            return Ok(ReconcileOutcome::Duplicate);
        }
        tracing::info!(
            order_number = %order.order_number,
            intent = %intent.id,
            total = %order.total,
            "order recorded"
        );

        if let Err(e) = self.email.send_order_confirmation(&order).await {
            // Best effort: the order stands even when the mail does not.
            tracing::warn!(error = %e, order_number = %order.order_number, "confirmation email failed");
        }
        Ok(ReconcileOutcome::Processed)
    }

    /// Resolve the customer email for a succeeded intent: the receipt
    /// email, then the attached customer record, then the metadata
    /// snapshot.
    async fn email_for(&self, intent: &PaymentIntent) -> Option<Email> {
        if let Some(email) = intent
            .receipt_email
            .as_deref()
            .and_then(|raw| raw.parse().ok())
        {
            return Some(email);
        }
        if let Some(customer) = intent.customer.as_ref()
            && let Some(email) = self.customers.customer_email(customer).await
        {
            return Some(email);
        }
        intent
            .metadata
            .get("customer_email")
            .and_then(|raw| raw.parse().ok())
    }

    async fn on_payment_failed(&self, intent: &PaymentIntent) -> ReconcileOutcome {
        let reason = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "Your payment could not be completed.".to_owned());
        tracing::warn!(
            intent = %intent.id,
            reference = %intent.id.failure_reference(),
            reason,
            "payment failed"
        );

        let Some(to) = intent
            .receipt_email
            .as_deref()
            .and_then(|raw| raw.parse::<Email>().ok())
        else {
            tracing::debug!(intent = %intent.id, "no customer email on failed intent");
            return ReconcileOutcome::Processed;
        };
        let notice = PaymentFailedNotice {
            to,
            customer_name: intent
                .shipping
                .as_ref()
                .and_then(|s| s.name.clone())
                .unwrap_or_default(),
            failure_reference: intent.id.failure_reference(),
            reason,
            retry_url: retry_url(&self.base_url, &intent.id),
        };
        if let Err(e) = self.email.send_payment_failed(&notice).await {
            tracing::warn!(error = %e, intent = %intent.id, "failure email failed");
        }
        ReconcileOutcome::Processed
    }
}

/// Rebuild the order from the intent's metadata snapshot.
///
/// Returns `None` when the snapshot is missing or does not parse; the
/// caller treats that as a non-retryable error.
fn order_from_intent(intent: &PaymentIntent, customer_email: Email) -> Option<Order> {
    let items: Vec<CartItem> =
        serde_json::from_str(intent.metadata.get("items")?.as_str()).ok()?;
    let subtotal = metadata_price(intent, "subtotal")?;
    let shipping = metadata_price(intent, "shipping")?;
    // Older intents may predate the tax metadata; the charged amount is
    // authoritative either way.
    let total = Price::from_cents(intent.amount);
    let tax = metadata_price(intent, "tax")
        .unwrap_or_else(|| Price::from_cents(intent.amount - subtotal.to_cents() - shipping.to_cents()));

    let shipping_details = intent.shipping.as_ref();
    let customer_name = shipping_details
        .and_then(|s| s.name.clone())
        .unwrap_or_default();
    let shipping_address = shipping_details
        .and_then(|s| s.address.as_ref())
        .map(|a| ShippingAddress {
            name: customer_name.clone(),
            line1: a.line1.clone().unwrap_or_default(),
            line2: a.line2.clone(),
            city: a.city.clone().unwrap_or_default(),
            state: a.state.clone().unwrap_or_default(),
            postal_code: a.postal_code.clone().unwrap_or_default(),
            country: a.country.clone().unwrap_or_else(|| "US".to_owned()),
        });

    Some(Order {
        order_number: OrderNumber::generate(Utc::now()),
        payment_intent: intent.id.clone(),
        checkout_session: Some(session_id_for(&intent.id)),
        customer_email,
        customer_name,
        items,
        subtotal,
        tax,
        shipping,
        total,
        shipping_address,
        status: OrderStatus::Completed,
        created_at: Utc::now(),
    })
}

fn metadata_price(intent: &PaymentIntent, key: &str) -> Option<Price> {
    intent
        .metadata
        .get(key)
        .and_then(|raw| raw.parse::<Decimal>().ok())
        .map(Price::new)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use opticworks_core::PaymentIntentId;

    use crate::stripe::types::PaymentIntentStatus;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        events: Mutex<Vec<String>>,
        orders: Mutex<Vec<Order>>,
    }

    impl OrderStore for MemoryStore {
        async fn mark_event_processed(&self, event: &EventId) -> Result<bool, RepositoryError> {
            let mut events = self.events.lock().expect("lock");
            if events.iter().any(|e| e == event.as_str()) {
                return Ok(false);
            }
            events.push(event.as_str().to_owned());
            Ok(true)
        }

        async fn insert_order(&self, order: &Order) -> Result<bool, RepositoryError> {
            let mut orders = self.orders.lock().expect("lock");
            if orders.iter().any(|o| o.payment_intent == order.payment_intent) {
                return Ok(false);
            }
            orders.push(order.clone());
            Ok(true)
        }
    }

    #[derive(Default)]
    struct MemoryMailer {
        confirmations: Mutex<Vec<OrderNumber>>,
        failures: Mutex<Vec<PaymentFailedNotice>>,
        broken: bool,
    }

    impl EmailSender for MemoryMailer {
        async fn send_order_confirmation(
            &self,
            order: &Order,
        ) -> Result<(), crate::services::ResendError> {
            if self.broken {
                return Err(crate::services::ResendError::Api {
                    status: 500,
                    message: "mail outage".into(),
                });
            }
            self.confirmations
                .lock()
                .expect("lock")
                .push(order.order_number.clone());
            Ok(())
        }

        async fn send_payment_failed(
            &self,
            notice: &PaymentFailedNotice,
        ) -> Result<(), crate::services::ResendError> {
            self.failures.lock().expect("lock").push(notice.clone());
            Ok(())
        }
    }

    /// Directory double: a fixed customer-id-to-email table.
    #[derive(Default)]
    struct StaticDirectory {
        emails: HashMap<String, Email>,
    }

    impl CustomerDirectory for StaticDirectory {
        async fn customer_email(&self, customer: &CustomerId) -> Option<Email> {
            self.emails.get(customer.as_str()).cloned()
        }
    }

    /// Store double whose first order inserts fail.
    struct FlakyStore {
        inner: MemoryStore,
        insert_failures_left: Mutex<u32>,
    }

    impl OrderStore for FlakyStore {
        async fn mark_event_processed(&self, event: &EventId) -> Result<bool, RepositoryError> {
            self.inner.mark_event_processed(event).await
        }

        async fn insert_order(&self, order: &Order) -> Result<bool, RepositoryError> {
            {
                let mut left = self.insert_failures_left.lock().expect("lock");
                if *left > 0 {
                    *left -= 1;
                    return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
                }
            }
            self.inner.insert_order(order).await
        }
    }

    fn intent(id: &str, status: PaymentIntentStatus) -> PaymentIntent {
        let mut metadata = HashMap::new();
        metadata.insert(
            "items".to_owned(),
            r#"[{"id":"kit-1","name":"Tesla Model 3 Tint Kit","price":"149.99","quantity":1,"attributes":{}}]"#
                .to_owned(),
        );
        metadata.insert("subtotal".to_owned(), "149.99".to_owned());
        metadata.insert("shipping".to_owned(), "0.00".to_owned());
        metadata.insert("tax".to_owned(), "12.37".to_owned());
        PaymentIntent {
            id: PaymentIntentId::new(id),
            amount: 16236,
            currency: "usd".into(),
            status,
            client_secret: None,
            customer: None,
            receipt_email: Some("buyer@example.com".into()),
            metadata,
            last_payment_error: None,
            shipping: None,
        }
    }

    fn succeeded(event_id: &str, intent_id: &str) -> WebhookEvent {
        WebhookEvent::PaymentSucceeded {
            id: EventId::new(event_id),
            intent: intent(intent_id, PaymentIntentStatus::Succeeded),
        }
    }

    fn reconciler(
        store: Arc<MemoryStore>,
        mailer: Arc<MemoryMailer>,
    ) -> Reconciler<Arc<MemoryStore>, Arc<MemoryMailer>, StaticDirectory> {
        Reconciler::new(
            store,
            mailer,
            StaticDirectory::default(),
            "https://optic.works".to_owned(),
        )
    }

    #[tokio::test]
    async fn first_delivery_records_the_order_and_sends_confirmation() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = reconciler(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = reconciler
            .reconcile(&succeeded("evt_1", "pi_3ABCdef12345678"))
            .await
            .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Processed);

        let orders = store.orders.lock().expect("lock");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total, Price::from_cents(16236));
        assert_eq!(orders[0].tax, Price::from_cents(1237));
        assert_eq!(orders[0].status, OrderStatus::Completed);
        assert_eq!(mailer.confirmations.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn redelivered_event_changes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = reconciler(Arc::clone(&store), Arc::clone(&mailer));

        let event = succeeded("evt_1", "pi_3ABCdef12345678");
        reconciler.reconcile(&event).await.expect("first");
        let outcome = reconciler.reconcile(&event).await.expect("second");

        assert_eq!(outcome, ReconcileOutcome::Duplicate);
        assert_eq!(store.orders.lock().expect("lock").len(), 1);
        assert_eq!(mailer.confirmations.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn distinct_events_for_one_intent_record_one_order() {
        // Stripe can emit distinct event ids for the same intent; the
        // payment-intent key catches what the event key cannot.
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = reconciler(Arc::clone(&store), Arc::clone(&mailer));

        reconciler
            .reconcile(&succeeded("evt_1", "pi_3ABCdef12345678"))
            .await
            .expect("first");
        let outcome = reconciler
            .reconcile(&succeeded("evt_2", "pi_3ABCdef12345678"))
            .await
            .expect("second");

        assert_eq!(outcome, ReconcileOutcome::Duplicate);
        assert_eq!(store.orders.lock().expect("lock").len(), 1);
        assert_eq!(mailer.confirmations.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn mail_outage_does_not_fail_the_delivery() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer {
            broken: true,
            ..MemoryMailer::default()
        });
        let reconciler = reconciler(Arc::clone(&store), mailer);

        let outcome = reconciler
            .reconcile(&succeeded("evt_1", "pi_3ABCdef12345678"))
            .await
            .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Processed);
        assert_eq!(store.orders.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn failed_order_insert_is_retried_on_redelivery() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::default(),
            insert_failures_left: Mutex::new(1),
        });
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&mailer),
            StaticDirectory::default(),
            "https://optic.works".to_owned(),
        );

        let event = succeeded("evt_1", "pi_3ABCdef12345678");
        let first = reconciler.reconcile(&event).await;
        assert!(first.is_err(), "a failed insert surfaces to the route");
        assert!(
            store.inner.events.lock().expect("lock").is_empty(),
            "a failed delivery must stay unrecorded so Stripe retries it"
        );

        let outcome = reconciler.reconcile(&event).await.expect("redelivery");
        assert_eq!(outcome, ReconcileOutcome::Processed);
        assert_eq!(store.inner.orders.lock().expect("lock").len(), 1);
        assert_eq!(mailer.confirmations.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn missing_receipt_email_falls_back_to_the_customer_record() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let directory = StaticDirectory {
            emails: HashMap::from([(
                "cus_1".to_owned(),
                "records@example.com".parse().expect("email"),
            )]),
        };
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&mailer),
            directory,
            "https://optic.works".to_owned(),
        );

        let mut anonymous = intent("pi_3ABCdef12345678", PaymentIntentStatus::Succeeded);
        anonymous.receipt_email = None;
        anonymous.customer = Some(CustomerId::new("cus_1"));
        let event = WebhookEvent::PaymentSucceeded {
            id: EventId::new("evt_1"),
            intent: anonymous,
        };

        let outcome = reconciler.reconcile(&event).await.expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Processed);
        let orders = store.orders.lock().expect("lock");
        assert_eq!(orders[0].customer_email.as_str(), "records@example.com");
    }

    #[tokio::test]
    async fn metadata_email_is_the_last_resort() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = reconciler(Arc::clone(&store), Arc::clone(&mailer));

        let mut anonymous = intent("pi_3ABCdef12345678", PaymentIntentStatus::Succeeded);
        anonymous.receipt_email = None;
        anonymous
            .metadata
            .insert("customer_email".to_owned(), "snapshot@example.com".to_owned());
        let event = WebhookEvent::PaymentSucceeded {
            id: EventId::new("evt_1"),
            intent: anonymous,
        };

        let outcome = reconciler.reconcile(&event).await.expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Processed);
        let orders = store.orders.lock().expect("lock");
        assert_eq!(orders[0].customer_email.as_str(), "snapshot@example.com");
    }

    #[tokio::test]
    async fn payment_failed_sends_notice_with_reference_and_retry_link() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = reconciler(Arc::clone(&store), Arc::clone(&mailer));

        let mut failed = intent("pi_3ABCdef12345678", PaymentIntentStatus::RequiresPaymentMethod);
        failed.last_payment_error = Some(crate::stripe::types::PaymentError {
            code: Some("card_declined".into()),
            message: Some("Your card was declined.".into()),
        });
        let event = WebhookEvent::PaymentFailed {
            id: EventId::new("evt_fail_1"),
            intent: failed,
        };

        let outcome = reconciler.reconcile(&event).await.expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Processed);
        assert!(store.orders.lock().expect("lock").is_empty());

        let failures = mailer.failures.lock().expect("lock");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failure_reference, "PI-12345678");
        assert_eq!(failures[0].reason, "Your card was declined.");
        assert_eq!(
            failures[0].retry_url,
            "https://optic.works/store/cart?retry=pi_3ABCdef12345678"
        );
    }

    #[tokio::test]
    async fn unusable_snapshot_is_acknowledged_not_retried() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = reconciler(Arc::clone(&store), Arc::clone(&mailer));

        let mut bad = intent("pi_bad", PaymentIntentStatus::Succeeded);
        bad.metadata.remove("items");
        let event = WebhookEvent::PaymentSucceeded {
            id: EventId::new("evt_bad"),
            intent: bad,
        };

        let outcome = reconciler.reconcile(&event).await.expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert!(store.orders.lock().expect("lock").is_empty());
        assert!(mailer.confirmations.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn ignored_event_types_are_acknowledged() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(MemoryMailer::default());
        let reconciler = reconciler(store, mailer);

        let event = WebhookEvent::Ignored {
            id: EventId::new("evt_other"),
            event_type: "charge.refunded".into(),
        };
        let outcome = reconciler.reconcile(&event).await.expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }
}
