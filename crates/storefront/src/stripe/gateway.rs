//! [`PaymentGateway`] implementation backed by the Stripe client.

use rust_decimal::Decimal;

use opticworks_core::{CartItem, CheckoutSessionId, Email, PaymentIntentId, Price, ShippingAddress};

use crate::checkout::{
    CaptureSurface, ConfirmOutcome, GatewayError, PaymentGateway, SessionCreated, SessionRequest,
    SessionTotals,
};
use crate::config::CheckoutConfig;

use super::client::{StripeClient, session_id_for};
use super::types::PaymentIntentStatus;
use super::StripeError;

/// Stripe-backed payment gateway.
///
/// A checkout session is a payment intent: the session id carries the
/// intent id, and the intent's metadata carries the order snapshot the
/// webhook reconciler rebuilds the order from.
#[derive(Clone)]
pub struct StripeGateway {
    client: StripeClient,
    settings: CheckoutConfig,
    base_url: String,
}

impl StripeGateway {
    #[must_use]
    pub fn new(client: StripeClient, settings: CheckoutConfig, base_url: String) -> Self {
        Self {
            client,
            settings,
            base_url,
        }
    }

    /// Shipping owed for a cart subtotal: free at or above the
    /// threshold, the flat rate below it.
    #[must_use]
    pub fn shipping_for(&self, subtotal: Price) -> Price {
        if subtotal.amount() >= self.settings.free_shipping_threshold.amount() {
            Price::ZERO
        } else {
            self.settings.flat_shipping_rate
        }
    }

    fn intent_id(session: &CheckoutSessionId) -> PaymentIntentId {
        PaymentIntentId::new(session.as_str())
    }
}

/// Hosted capture surface.
///
/// The real element lives in the customer's browser; server-side, the
/// surface tracks what the browser reports. Address completeness is the
/// part this process can observe directly.
#[derive(Debug, Default)]
pub struct HostedCapture {
    address_complete: bool,
    mounted: bool,
}

impl HostedCapture {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            address_complete: false,
            mounted: true,
        }
    }
}

impl CaptureSurface for HostedCapture {
    fn address_changed(&mut self, address: &ShippingAddress) {
        self.address_complete = address.is_complete();
    }

    fn is_complete(&self) -> bool {
        self.mounted && self.address_complete
    }

    fn unmount(&mut self) {
        self.mounted = false;
    }
}

/// Stripe error codes that mean the payment itself was rejected, as
/// opposed to a transport or server failure.
const DECLINE_CODES: &[&str] = &[
    "card_declined",
    "expired_card",
    "incorrect_cvc",
    "incorrect_number",
    "insufficient_funds",
];

fn map_error(e: StripeError) -> GatewayError {
    match e {
        StripeError::Api {
            status,
            message,
            code,
        } => {
            if code.as_deref().is_some_and(|c| DECLINE_CODES.contains(&c)) {
                GatewayError::Declined { message }
            } else {
                GatewayError::Service(format!("Stripe API error ({status}): {message}"))
            }
        }
        StripeError::Http(http) if http.is_timeout() => GatewayError::Timeout,
        other => GatewayError::Service(other.to_string()),
    }
}

fn metadata_price(intent: &super::types::PaymentIntent, key: &str) -> Option<Price> {
    intent
        .metadata
        .get(key)
        .and_then(|raw| raw.parse::<Decimal>().ok())
        .map(Price::new)
}

impl PaymentGateway for StripeGateway {
    type Capture = HostedCapture;

    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<SessionCreated, GatewayError> {
        let subtotal: Price = request.items.iter().map(CartItem::line_total).sum();
        let shipping = self.shipping_for(subtotal);
        let intent = self
            .client
            .create_payment_intent(&request.items, subtotal, shipping)
            .await
            .map_err(map_error)?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| GatewayError::Service("payment intent missing client secret".into()))?;
        Ok(SessionCreated {
            session: session_id_for(&intent.id),
            client_secret,
            totals: SessionTotals { subtotal, shipping },
        })
    }

    fn mount_capture(&self, _session: &CheckoutSessionId) -> Result<Self::Capture, GatewayError> {
        Ok(HostedCapture::new())
    }

    async fn finalize(
        &self,
        session: &CheckoutSessionId,
        email: &Email,
        tax: Price,
    ) -> Result<(), GatewayError> {
        let intent_id = Self::intent_id(session);
        // The pre-tax totals come from the intent's own metadata, so a
        // re-finalization after a decline never compounds tax into the
        // amount twice.
        let intent = self
            .client
            .retrieve_payment_intent(&intent_id)
            .await
            .map_err(map_error)?;
        let subtotal = metadata_price(&intent, "subtotal")
            .ok_or_else(|| GatewayError::Service("payment intent missing subtotal".into()))?;
        let shipping = metadata_price(&intent, "shipping")
            .ok_or_else(|| GatewayError::Service("payment intent missing shipping".into()))?;
        let amount = subtotal + shipping + tax;
        let name = intent.shipping.as_ref().and_then(|s| s.name.as_deref());
        let customer = self
            .client
            .find_or_create_customer(email, name)
            .await
            .map_err(map_error)?;
        self.client
            .finalize_payment_intent(&intent_id, &customer.id, email, amount, tax)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn confirm(&self, session: &CheckoutSessionId) -> Result<ConfirmOutcome, GatewayError> {
        let intent_id = Self::intent_id(session);
        let return_url = format!("{}/store/checkout/complete", self.base_url.trim_end_matches('/'));
        let intent = self
            .client
            .confirm_payment_intent(&intent_id, &return_url)
            .await
            .map_err(map_error)?;
        match intent.status {
            PaymentIntentStatus::Succeeded
            | PaymentIntentStatus::Processing
            | PaymentIntentStatus::RequiresCapture => Ok(ConfirmOutcome::Succeeded {
                session: session.clone(),
            }),
            // The hosted surface completes the redirect in the browser;
            // the definitive outcome arrives through the webhook.
            PaymentIntentStatus::RequiresAction => Ok(ConfirmOutcome::RedirectCompleted {
                session: session.clone(),
            }),
            PaymentIntentStatus::RequiresPaymentMethod
            | PaymentIntentStatus::RequiresConfirmation
            | PaymentIntentStatus::Canceled => {
                let message = intent
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Your payment could not be completed.".to_owned());
                Err(GatewayError::Declined { message })
            }
        }
    }

    async fn calculate_tax(
        &self,
        items: &[CartItem],
        address: &ShippingAddress,
    ) -> Result<Price, GatewayError> {
        let calculation = self
            .client
            .calculate_tax(items, address)
            .await
            .map_err(map_error)?;
        Ok(Price::from_cents(calculation.tax_amount_exclusive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::time::Duration;

    fn gateway() -> StripeGateway {
        let client = StripeClient::new(
            SecretString::from("sk_test_4eC39HqLyjWDarjtT1zdp7dc"),
            Duration::from_secs(10),
        )
        .expect("client");
        StripeGateway::new(
            client,
            CheckoutConfig::default(),
            "https://optic.works".to_owned(),
        )
    }

    #[test]
    fn shipping_is_free_at_and_above_the_threshold() {
        let gateway = gateway();
        assert_eq!(gateway.shipping_for(Price::from_cents(20000_00)), Price::ZERO);
        assert_eq!(gateway.shipping_for(Price::from_cents(200_00)), Price::ZERO);
        assert_eq!(
            gateway.shipping_for(Price::from_cents(199_99)),
            Price::from_cents(15_99)
        );
        assert_eq!(
            gateway.shipping_for(Price::from_cents(1)),
            Price::from_cents(15_99)
        );
    }

    #[test]
    fn capture_reports_complete_only_while_mounted() {
        let mut capture = HostedCapture::new();
        assert!(!capture.is_complete());

        let address = ShippingAddress {
            name: "Jordan Reyes".into(),
            line1: "1100 Congress Ave".into(),
            line2: None,
            city: "Austin".into(),
            state: "TX".into(),
            postal_code: "78701".into(),
            country: "US".into(),
        };
        capture.address_changed(&address);
        assert!(capture.is_complete());

        capture.unmount();
        assert!(!capture.is_complete());
    }

    #[test]
    fn partial_address_leaves_capture_incomplete() {
        let mut capture = HostedCapture::new();
        let address = ShippingAddress {
            line1: "1100 Congress Ave".into(),
            ..ShippingAddress::default()
        };
        capture.address_changed(&address);
        assert!(!capture.is_complete());
    }
}
