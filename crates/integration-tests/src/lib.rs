//! Integration tests for the OpticWorks checkout service.
//!
//! The tests drive real components (cart store, checkout orchestrator,
//! webhook verification, reconciler) against in-memory doubles for the
//! network edges: payment processor, address verifier, order storage,
//! and outbound email.
//!
//! # Test Categories
//!
//! - `checkout_flow` - Cart through confirmed payment
//! - `webhook_reconciliation` - Signed deliveries into durable orders

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use opticworks_core::{
    CartItem, CheckoutSessionId, CustomerId, Email, EventId, Order, Price, ShippingAddress,
    ValidatedAddress,
};
use opticworks_storefront::checkout::{
    AddressVerifier, CaptureSurface, ConfirmOutcome, GatewayError, PaymentGateway, SessionCreated,
    SessionRequest, SessionTotals, VerificationOutcome,
};
use opticworks_storefront::db::RepositoryError;
use opticworks_storefront::services::{
    CustomerDirectory, EmailSender, OrderStore, PaymentFailedNotice, ResendError,
};

/// A complete Texas shipping address.
#[must_use]
pub fn austin_address() -> ShippingAddress {
    ShippingAddress {
        name: "Jordan Reyes".into(),
        line1: "1100 Congress Ave".into(),
        line2: None,
        city: "Austin".into(),
        state: "TX".into(),
        postal_code: "78701".into(),
        country: "US".into(),
    }
}

/// The standard single-kit cart used across scenarios.
#[must_use]
pub fn tint_kit() -> CartItem {
    CartItem::new("kit-1", "Tesla Model 3 Tint Kit", Price::from_cents(14999))
}

/// Payment processor double with scriptable tax and confirmation.
pub struct TestGateway {
    /// Tax amount and artificial latency per state code; states absent
    /// from the table fail the calculation.
    pub tax_by_state: HashMap<String, (Price, Duration)>,
    /// Confirmation outcomes consumed in order; exhausted means error.
    pub confirm_script: Mutex<Vec<Result<ConfirmOutcome, GatewayError>>>,
    pub confirm_calls: Mutex<u32>,
}

impl TestGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tax_by_state: HashMap::new(),
            confirm_script: Mutex::new(vec![Ok(ConfirmOutcome::Succeeded {
                session: CheckoutSessionId::new("cs_test_1"),
            })]),
            confirm_calls: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn with_tax(mut self, state: &str, cents: i64, latency: Duration) -> Self {
        self.tax_by_state
            .insert(state.to_owned(), (Price::from_cents(cents), latency));
        self
    }

    #[must_use]
    pub fn with_confirm_script(self, script: Vec<Result<ConfirmOutcome, GatewayError>>) -> Self {
        *self.confirm_script.lock().expect("lock") = script;
        self
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture double: completeness mirrors the last address fed in.
#[derive(Debug, Default)]
pub struct TestCapture {
    complete: bool,
}

impl CaptureSurface for TestCapture {
    fn address_changed(&mut self, address: &ShippingAddress) {
        self.complete = address.is_complete();
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn unmount(&mut self) {
        self.complete = false;
    }
}

impl PaymentGateway for TestGateway {
    type Capture = TestCapture;

    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<SessionCreated, GatewayError> {
        let subtotal: Price = request.items.iter().map(CartItem::line_total).sum();
        Ok(SessionCreated {
            session: CheckoutSessionId::new("cs_test_1"),
            client_secret: "cs_test_1_secret".into(),
            totals: SessionTotals {
                subtotal,
                shipping: Price::ZERO,
            },
        })
    }

    fn mount_capture(&self, _session: &CheckoutSessionId) -> Result<Self::Capture, GatewayError> {
        Ok(TestCapture::default())
    }

    async fn finalize(
        &self,
        _session: &CheckoutSessionId,
        _email: &Email,
        _tax: Price,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn confirm(&self, _session: &CheckoutSessionId) -> Result<ConfirmOutcome, GatewayError> {
        *self.confirm_calls.lock().expect("lock") += 1;
        let mut script = self.confirm_script.lock().expect("lock");
        if script.is_empty() {
            return Err(GatewayError::Service("confirm script exhausted".into()));
        }
        script.remove(0)
    }

    async fn calculate_tax(
        &self,
        _items: &[CartItem],
        address: &ShippingAddress,
    ) -> Result<Price, GatewayError> {
        match self.tax_by_state.get(&address.state) {
            Some((amount, latency)) => {
                tokio::time::sleep(*latency).await;
                Ok(*amount)
            }
            None => Err(GatewayError::Service("no tax data for state".into())),
        }
    }
}

/// Verifier double that verifies every complete address as-is.
#[derive(Default)]
pub struct TestVerifier {
    pub calls: Mutex<Vec<ShippingAddress>>,
}

impl AddressVerifier for TestVerifier {
    async fn verify(&self, address: &ShippingAddress) -> VerificationOutcome {
        self.calls.lock().expect("lock").push(address.clone());
        VerificationOutcome::Verified(ValidatedAddress {
            address: address.clone(),
            residential: true,
            deliverable: true,
            zip4: None,
            diagnostics: Vec::new(),
        })
    }
}

/// In-memory order store with the same idempotency contracts as the
/// database.
#[derive(Default)]
pub struct MemoryOrders {
    pub events: Mutex<Vec<String>>,
    pub orders: Mutex<Vec<Order>>,
}

impl OrderStore for MemoryOrders {
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
        if orders
            .iter()
            .any(|o| o.payment_intent == order.payment_intent)
        {
            return Ok(false);
        }
        orders.push(order.clone());
        Ok(true)
    }
}

/// In-memory mailbox recording what would have been sent.
#[derive(Default)]
pub struct MemoryMailbox {
    pub confirmations: Mutex<Vec<Order>>,
    pub failures: Mutex<Vec<PaymentFailedNotice>>,
}

impl EmailSender for MemoryMailbox {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), ResendError> {
        self.confirmations.lock().expect("lock").push(order.clone());
        Ok(())
    }

    async fn send_payment_failed(&self, notice: &PaymentFailedNotice) -> Result<(), ResendError> {
        self.failures.lock().expect("lock").push(notice.clone());
        Ok(())
    }
}

/// In-memory customer directory keyed by customer id.
#[derive(Default)]
pub struct MemoryCustomers {
    pub emails: Mutex<HashMap<String, Email>>,
}

impl CustomerDirectory for MemoryCustomers {
    async fn customer_email(&self, customer: &CustomerId) -> Option<Email> {
        self.emails.lock().expect("lock").get(customer.as_str()).cloned()
    }
}

/// Let spawned tasks make progress without advancing the paused clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
