//! Low-level Stripe REST client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::instrument;

use opticworks_core::{
    CartItem, CheckoutSessionId, CustomerId, Email, PaymentIntentId, Price, ShippingAddress,
};

use super::types::{Customer, ErrorEnvelope, List, PaymentIntent, TaxCalculation};
use super::StripeError;

/// Stripe REST API base URL.
const API_BASE: &str = "https://api.stripe.com";

/// Stripe API client.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    secret_key: SecretString,
    base_url: String,
}

impl StripeClient {
    /// Create a client authenticated with the given secret key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(secret_key: SecretString, timeout: Duration) -> Result<Self, StripeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(StripeClientInner {
                client,
                secret_key,
                base_url: API_BASE.to_owned(),
            }),
        })
    }

    /// Point the client at a different base URL. Used by tests to target
    /// a local stub server.
    #[must_use]
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StripeClientInner {
                client: self.inner.client.clone(),
                secret_key: self.inner.secret_key.clone(),
                base_url: base_url.into(),
            }),
        }
    }

    /// Look up a customer by email, creating one if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if either Stripe call fails.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn find_or_create_customer(
        &self,
        email: &Email,
        name: Option<&str>,
    ) -> Result<Customer, StripeError> {
        let existing: List<Customer> = self
            .request(
                Method::GET,
                "/v1/customers",
                &[("email", email.as_str()), ("limit", "1")],
            )
            .await?;
        if let Some(customer) = existing.data.into_iter().next() {
            return Ok(customer);
        }

        let mut params = vec![("email".to_owned(), email.as_str().to_owned())];
        if let Some(name) = name {
            params.push(("name".to_owned(), name.to_owned()));
        }
        self.request(Method::POST, "/v1/customers", &params).await
    }

    /// Fetch a customer record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the Stripe call fails.
    pub async fn retrieve_customer(&self, customer: &CustomerId) -> Result<Customer, StripeError> {
        self.request::<Customer>(
            Method::GET,
            &format!("/v1/customers/{}", customer.as_str()),
            &[] as &[(&str, &str)],
        )
        .await
    }

    /// Create the payment intent backing a checkout session.
    ///
    /// The order snapshot is written into metadata so the webhook
    /// reconciler can rebuild the order from the event alone.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the Stripe call fails.
    #[instrument(skip(self, items))]
    pub async fn create_payment_intent(
        &self,
        items: &[CartItem],
        subtotal: Price,
        shipping: Price,
    ) -> Result<PaymentIntent, StripeError> {
        let amount = subtotal.to_cents() + shipping.to_cents();
        let items_json = serde_json::to_string(items)?;
        let params = [
            ("amount".to_owned(), amount.to_string()),
            ("currency".to_owned(), "usd".to_owned()),
            ("automatic_payment_methods[enabled]".to_owned(), "true".to_owned()),
            ("metadata[items]".to_owned(), items_json),
            ("metadata[subtotal]".to_owned(), subtotal.amount().to_string()),
            ("metadata[shipping]".to_owned(), shipping.amount().to_string()),
        ];
        self.request(Method::POST, "/v1/payment_intents", &params)
            .await
    }

    /// Attach the customer record, receipt email, and the final tax
    /// amount to the intent before confirmation. The amount grows by
    /// the tax owed.
    ///
    /// # Errors
    ///
    /// Returns an error if the Stripe call fails.
    #[instrument(skip(self), fields(intent = %intent))]
    pub async fn finalize_payment_intent(
        &self,
        intent: &PaymentIntentId,
        customer: &CustomerId,
        email: &Email,
        amount: Price,
        tax: Price,
    ) -> Result<PaymentIntent, StripeError> {
        let params = [
            ("customer".to_owned(), customer.as_str().to_owned()),
            ("receipt_email".to_owned(), email.as_str().to_owned()),
            ("amount".to_owned(), amount.to_cents().to_string()),
            ("metadata[tax]".to_owned(), tax.amount().to_string()),
            ("metadata[customer_email]".to_owned(), email.as_str().to_owned()),
        ];
        self.request(
            Method::POST,
            &format!("/v1/payment_intents/{}", intent.as_str()),
            &params,
        )
        .await
    }

    /// Confirm a payment intent server-side.
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Api` with the decline code when the
    /// processor rejects the payment.
    #[instrument(skip(self), fields(intent = %intent))]
    pub async fn confirm_payment_intent(
        &self,
        intent: &PaymentIntentId,
        return_url: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let params = [("return_url", return_url)];
        self.request(
            Method::POST,
            &format!("/v1/payment_intents/{}/confirm", intent.as_str()),
            &params,
        )
        .await
    }

    /// Fetch a payment intent by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the Stripe call fails.
    pub async fn retrieve_payment_intent(
        &self,
        intent: &PaymentIntentId,
    ) -> Result<PaymentIntent, StripeError> {
        self.request::<PaymentIntent>(
            Method::GET,
            &format!("/v1/payment_intents/{}", intent.as_str()),
            &[] as &[(&str, &str)],
        )
        .await
    }

    /// Calculate sales tax for a cart shipped to the given address.
    ///
    /// # Errors
    ///
    /// Returns an error if the Stripe call fails, including when Stripe
    /// cannot resolve the address to a tax jurisdiction. Callers treat
    /// any failure as "tax unavailable", never as zero.
    #[instrument(skip(self, items), fields(state = %address.state, postal_code = %address.postal_code))]
    pub async fn calculate_tax(
        &self,
        items: &[CartItem],
        address: &ShippingAddress,
    ) -> Result<TaxCalculation, StripeError> {
        let mut params = vec![
            ("currency".to_owned(), "usd".to_owned()),
            (
                "customer_details[address][line1]".to_owned(),
                address.line1.clone(),
            ),
            (
                "customer_details[address][city]".to_owned(),
                address.city.clone(),
            ),
            (
                "customer_details[address][state]".to_owned(),
                address.state.clone(),
            ),
            (
                "customer_details[address][postal_code]".to_owned(),
                address.postal_code.clone(),
            ),
            (
                "customer_details[address][country]".to_owned(),
                address.country.clone(),
            ),
            (
                "customer_details[address_source]".to_owned(),
                "shipping".to_owned(),
            ),
        ];
        for (i, item) in items.iter().enumerate() {
            params.push((
                format!("line_items[{i}][amount]"),
                item.line_total().to_cents().to_string(),
            ));
            params.push((format!("line_items[{i}][reference]"), item.id.to_string()));
        }
        self.request(Method::POST, "/v1/tax/calculations", &params)
            .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &(impl serde::Serialize + ?Sized),
    ) -> Result<T, StripeError> {
        let url = format!("{}{path}", self.inner.base_url);
        let mut builder = self
            .inner
            .client
            .request(method.clone(), &url)
            .bearer_auth(self.inner.secret_key.expose_secret());
        builder = if method == Method::GET {
            builder.query(params)
        } else {
            builder.form(params)
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }

        let envelope: Result<ErrorEnvelope, _> = serde_json::from_slice(&body);
        let (message, code) = match envelope {
            Ok(envelope) => (
                envelope
                    .error
                    .message
                    .unwrap_or_else(|| "unknown Stripe error".to_owned()),
                envelope.error.code,
            ),
            Err(_) => (String::from_utf8_lossy(&body).into_owned(), None),
        };
        Err(StripeError::Api {
            status: status.as_u16(),
            message,
            code,
        })
    }
}

/// Build the cart retry URL embedded in payment-failure emails. Links
/// back to the cart with the failed intent attached so the storefront
/// can offer a one-click retry.
#[must_use]
pub fn retry_url(base_url: &str, intent: &PaymentIntentId) -> String {
    format!(
        "{}/store/cart?retry={}",
        base_url.trim_end_matches('/'),
        intent.as_str()
    )
}

/// A checkout session's public identity is its payment intent id; the
/// intent's client secret is what authorizes capture in the browser.
#[must_use]
pub fn session_id_for(intent: &PaymentIntentId) -> CheckoutSessionId {
    CheckoutSessionId::new(intent.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_url_appends_intent_id() {
        let intent = PaymentIntentId::new("pi_3ABCdef12345678");
        assert_eq!(
            retry_url("https://optic.works", &intent),
            "https://optic.works/store/cart?retry=pi_3ABCdef12345678"
        );
        // Trailing slash does not double up.
        assert_eq!(
            retry_url("https://optic.works/", &intent),
            "https://optic.works/store/cart?retry=pi_3ABCdef12345678"
        );
    }
}
