//! Transactional email via the Resend API.
//!
//! Two messages leave this module: the order confirmation after a
//! verified payment, and the payment-failed notice with a retry link.
//! Both are best-effort; the reconciler never fails a webhook over a
//! mail problem.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use opticworks_core::{Email, Order};

use crate::config::EmailConfig;

/// Resend API endpoint.
const API_URL: &str = "https://api.resend.com/emails";

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum ResendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resend returned an error response.
    #[error("Resend API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// A payment-failed notice, addressed and ready to render.
#[derive(Debug, Clone)]
pub struct PaymentFailedNotice {
    pub to: Email,
    pub customer_name: String,
    /// Human-facing reference, `PI-` plus the tail of the intent id.
    pub failure_reference: String,
    /// The processor's failure message, shown verbatim.
    pub reason: String,
    /// Link back to the cart with the failed intent attached.
    pub retry_url: String,
}

/// Outbound transactional mail, as the reconciler sees it.
pub trait EmailSender: Send + Sync + 'static {
    /// Send the order confirmation for a completed order.
    fn send_order_confirmation(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<(), ResendError>> + Send;

    /// Send the payment-failed notice.
    fn send_payment_failed(
        &self,
        notice: &PaymentFailedNotice,
    ) -> impl Future<Output = Result<(), ResendError>> + Send;
}

impl<T: EmailSender> EmailSender for Arc<T> {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), ResendError> {
        (**self).send_order_confirmation(order).await
    }

    async fn send_payment_failed(&self, notice: &PaymentFailedNotice) -> Result<(), ResendError> {
        (**self).send_payment_failed(notice).await
    }
}

/// Resend API client.
#[derive(Clone)]
pub struct ResendClient {
    inner: Arc<ResendClientInner>,
}

struct ResendClientInner {
    client: reqwest::Client,
    api_key: SecretString,
    from_address: String,
    base_url: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl ResendClient {
    /// Create a client from the email configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &EmailConfig) -> Result<Self, ResendError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            inner: Arc::new(ResendClientInner {
                client,
                api_key: config.api_key.clone(),
                from_address: config.from_address.clone(),
                base_url: API_URL.to_owned(),
            }),
        })
    }

    /// Point the client at a different URL. Used by tests to target a
    /// local stub server.
    #[must_use]
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ResendClientInner {
                client: self.inner.client.clone(),
                api_key: self.inner.api_key.clone(),
                from_address: self.inner.from_address.clone(),
                base_url: base_url.into(),
            }),
        }
    }

    async fn send(&self, to: &Email, subject: &str, html: &str) -> Result<(), ResendError> {
        let request = SendRequest {
            from: &self.inner.from_address,
            to: [to.as_str()],
            subject,
            html,
        };
        let response = self
            .inner
            .client
            .post(&self.inner.base_url)
            .bearer_auth(self.inner.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(ResendError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

impl EmailSender for ResendClient {
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), ResendError> {
        let subject = format!("Order Confirmation - {}", order.order_number);
        let html = render_order_confirmation(order);
        self.send(&order.customer_email, &subject, &html).await
    }

    #[instrument(skip(self, notice), fields(reference = %notice.failure_reference))]
    async fn send_payment_failed(&self, notice: &PaymentFailedNotice) -> Result<(), ResendError> {
        let subject = format!("Payment Failed - {}", notice.failure_reference);
        let html = render_payment_failed(notice);
        self.send(&notice.to, &subject, &html).await
    }
}

fn render_order_confirmation(order: &Order) -> String {
    let mut rows = String::new();
    for item in &order.items {
        rows.push_str(&format!(
            "<tr><td>{} × {}</td><td align=\"right\">{}</td></tr>",
            item.quantity,
            escape(&item.name),
            item.line_total()
        ));
    }
    format!(
        "<h1>Thanks for your order, {name}!</h1>\
         <p>Order <strong>{number}</strong> is confirmed.</p>\
         <table width=\"100%\">{rows}\
         <tr><td>Subtotal</td><td align=\"right\">{subtotal}</td></tr>\
         <tr><td>Shipping</td><td align=\"right\">{shipping}</td></tr>\
         <tr><td>Tax</td><td align=\"right\">{tax}</td></tr>\
         <tr><td><strong>Total</strong></td><td align=\"right\"><strong>{total}</strong></td></tr>\
         </table>\
         <p>We'll email you tracking details once your kit ships.</p>",
        name = escape(&order.customer_name),
        number = order.order_number,
        rows = rows,
        subtotal = order.subtotal,
        shipping = order.shipping,
        tax = order.tax,
        total = order.total,
    )
}

fn render_payment_failed(notice: &PaymentFailedNotice) -> String {
    format!(
        "<h1>Your payment didn't go through</h1>\
         <p>Hi {name}, your payment (reference <strong>{reference}</strong>) failed:</p>\
         <p><em>{reason}</em></p>\
         <p>Your cart is saved. <a href=\"{retry}\">Try again</a> whenever you're ready.</p>",
        name = escape(&notice.customer_name),
        reference = notice.failure_reference,
        reason = escape(&notice.reason),
        retry = notice.retry_url,
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use opticworks_core::{CartItem, OrderNumber, OrderStatus, PaymentIntentId, Price};

    use super::*;

    fn order() -> Order {
        Order {
            order_number: OrderNumber::from("ORD-1700000000123".to_owned()),
            payment_intent: PaymentIntentId::new("pi_3ABCdef12345678"),
            checkout_session: None,
            customer_email: "buyer@example.com".parse().expect("email"),
            customer_name: "Jordan Reyes".into(),
            items: vec![CartItem::new(
                "kit-1",
                "Tesla Model 3 Tint Kit",
                Price::new(Decimal::new(14999, 2)),
            )],
            subtotal: Price::new(Decimal::new(14999, 2)),
            tax: Price::new(Decimal::new(1237, 2)),
            shipping: Price::ZERO,
            total: Price::new(Decimal::new(16236, 2)),
            shipping_address: None,
            status: OrderStatus::Completed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn confirmation_includes_order_number_and_totals() {
        let html = render_order_confirmation(&order());
        assert!(html.contains("ORD-1700000000123"));
        assert!(html.contains("$162.36"));
        assert!(html.contains("Tesla Model 3 Tint Kit"));
    }

    #[test]
    fn failure_notice_links_the_retry_url_and_quotes_the_reason() {
        let notice = PaymentFailedNotice {
            to: "buyer@example.com".parse().expect("email"),
            customer_name: "Jordan Reyes".into(),
            failure_reference: "PI-12345678".into(),
            reason: "Your card was declined.".into(),
            retry_url: "https://optic.works/store/cart?retry=pi_3ABCdef12345678".into(),
        };
        let html = render_payment_failed(&notice);
        assert!(html.contains("PI-12345678"));
        assert!(html.contains("Your card was declined."));
        assert!(html.contains("retry=pi_3ABCdef12345678"));
    }

    #[test]
    fn item_names_are_html_escaped() {
        let mut order = order();
        order.items[0].name = "Kit <35%> & more".into();
        let html = render_order_confirmation(&order);
        assert!(html.contains("Kit &lt;35%&gt; &amp; more"));
    }
}
