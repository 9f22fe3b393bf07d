//! Stripe webhook signature verification and event parsing.
//!
//! Signatures arrive in the `Stripe-Signature` header as
//! `t=<unix>,v1=<hex>[,v1=<hex>...]`. The signed payload is
//! `"<t>.<raw body>"` under HMAC-SHA256 with the endpoint secret. A
//! payload that fails verification is rejected before any parsing of
//! its contents.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use opticworks_core::EventId;

use super::types::PaymentIntent;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum accepted age of a signed payload, in seconds.
const TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("no v1 signature present")]
    MissingSignature,
    #[error("timestamp outside tolerance window")]
    TimestampOutOfTolerance,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a webhook payload against its signature header.
///
/// `now` is the current Unix timestamp; it is a parameter so tests can
/// pin it.
///
/// # Errors
///
/// Returns a `SignatureError` naming what failed. Callers must treat
/// every variant the same way: reject the delivery with no side
/// effects.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &SecretString,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::MalformedHeader);
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                );
            }
            "v1" => signatures.push(value),
            // Unknown schemes (v0, future versions) are ignored.
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if (now - timestamp).abs() > TOLERANCE_SECS {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if signatures
        .iter()
        .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes()))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Compute the `Stripe-Signature` header value for a payload. Test and
/// tooling helper; the verification path never uses it.
#[must_use]
pub fn sign_payload(payload: &[u8], secret: &SecretString, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

/// A parsed webhook event relevant to checkout.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    PaymentSucceeded {
        id: EventId,
        intent: PaymentIntent,
    },
    PaymentFailed {
        id: EventId,
        intent: PaymentIntent,
    },
    /// Any event type checkout does not act on. Acknowledged as-is.
    Ignored {
        id: EventId,
        event_type: String,
    },
}

impl WebhookEvent {
    /// The delivery's event id, used for idempotency tracking.
    #[must_use]
    pub const fn id(&self) -> &EventId {
        match self {
            Self::PaymentSucceeded { id, .. }
            | Self::PaymentFailed { id, .. }
            | Self::Ignored { id, .. } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// Parse a verified payload into a `WebhookEvent`.
///
/// # Errors
///
/// Returns a parse error when the payload is not a Stripe event
/// envelope, or when a payment event's object is not a payment intent.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, serde_json::Error> {
    let raw: RawEvent = serde_json::from_slice(payload)?;
    match raw.event_type.as_str() {
        "payment_intent.succeeded" => Ok(WebhookEvent::PaymentSucceeded {
            id: raw.id,
            intent: serde_json::from_value(raw.data.object)?,
        }),
        "payment_intent.payment_failed" => Ok(WebhookEvent::PaymentFailed {
            id: raw.id,
            intent: serde_json::from_value(raw.data.object)?,
        }),
        _ => Ok(WebhookEvent::Ignored {
            id: raw.id,
            event_type: raw.event_type,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("whsec_test_8f2a9b")
    }

    const NOW: i64 = 1_756_400_000;

    #[test]
    fn accepts_a_correctly_signed_payload() {
        let payload = br#"{"id":"evt_1","type":"ping"}"#;
        let header = sign_payload(payload, &secret(), NOW);
        assert_eq!(verify_signature(payload, &header, &secret(), NOW), Ok(()));
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let payload = br#"{"id":"evt_1","type":"ping"}"#;
        let header = sign_payload(payload, &secret(), NOW);
        let tampered = br#"{"id":"evt_1","type":"pong"}"#;
        assert_eq!(
            verify_signature(tampered, &header, &secret(), NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_the_wrong_secret() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign_payload(payload, &SecretString::from("whsec_other"), NOW);
        assert_eq!(
            verify_signature(payload, &header, &secret(), NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let payload = br#"{"id":"evt_1"}"#;
        // Signed 10 minutes ago, beyond the 5 minute window.
        let signed_at = NOW - 600;
        let header = sign_payload(payload, &secret(), signed_at);
        assert_eq!(
            verify_signature(payload, &header, &secret(), NOW),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn accepts_when_any_v1_signature_matches() {
        // Stripe sends multiple v1 entries during secret rotation.
        let payload = br#"{"id":"evt_1"}"#;
        let good = sign_payload(payload, &secret(), NOW);
        let good_sig = good.split("v1=").nth(1).expect("v1 part");
        let header = format!("t={NOW},v1={},v1={good_sig}", "0".repeat(64));
        assert_eq!(verify_signature(payload, &header, &secret(), NOW), Ok(()));
    }

    #[test]
    fn rejects_a_header_with_no_v1() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = format!("t={NOW},v0=abcdef");
        assert_eq!(
            verify_signature(payload, &header, &secret(), NOW),
            Err(SignatureError::MissingSignature)
        );
    }

    #[test]
    fn rejects_garbage_headers() {
        let payload = br#"{"id":"evt_1"}"#;
        for header in ["", "t=notanumber,v1=aa", "no-equals-sign"] {
            assert!(verify_signature(payload, header, &secret(), NOW).is_err());
        }
    }

    #[test]
    fn parses_a_payment_succeeded_event() {
        let payload = br#"{
            "id": "evt_success_1",
            "type": "payment_intent.succeeded",
            "data": {
                "object": {
                    "id": "pi_3ABCdef12345678",
                    "amount": 16236,
                    "currency": "usd",
                    "status": "succeeded",
                    "receipt_email": "buyer@example.com",
                    "metadata": {
                        "items": "[{\"id\":\"kit-1\",\"name\":\"Tesla Model 3 Tint Kit\",\"price\":\"149.99\",\"quantity\":1,\"attributes\":{}}]",
                        "subtotal": "149.99",
                        "shipping": "0.00"
                    }
                }
            }
        }"#;
        match parse_event(payload).expect("parse") {
            WebhookEvent::PaymentSucceeded { id, intent } => {
                assert_eq!(id.as_str(), "evt_success_1");
                assert_eq!(intent.amount, 16236);
                assert_eq!(intent.receipt_email.as_deref(), Some("buyer@example.com"));
            }
            other => panic!("expected PaymentSucceeded, got {other:?}"),
        }
    }

    #[test]
    fn unhandled_event_types_parse_as_ignored() {
        let payload = br#"{"id":"evt_x","type":"charge.refunded","data":{"object":{}}}"#;
        match parse_event(payload).expect("parse") {
            WebhookEvent::Ignored { event_type, .. } => {
                assert_eq!(event_type, "charge.refunded");
            }
            other => panic!("expected Ignored, got {other:?}"),
        }
    }
}
