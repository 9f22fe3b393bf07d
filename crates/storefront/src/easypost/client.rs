//! Low-level `EasyPost` REST client and the [`AddressVerifier`] adapter.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use opticworks_core::{ShippingAddress, ValidatedAddress};

use crate::checkout::{AddressVerifier, VerificationOutcome};

use super::EasyPostError;

/// `EasyPost` REST API base URL.
const API_BASE: &str = "https://api.easypost.com";

/// `EasyPost` API client.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct EasyPostClient {
    inner: Arc<EasyPostClientInner>,
}

struct EasyPostClientInner {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Serialize)]
struct CreateAddressRequest<'a> {
    address: AddressPayload<'a>,
    verify: &'a [&'a str],
}

#[derive(Serialize)]
struct AddressPayload<'a> {
    name: &'a str,
    street1: &'a str,
    street2: Option<&'a str>,
    city: &'a str,
    state: &'a str,
    zip: &'a str,
    country: &'a str,
}

#[derive(Debug, Deserialize)]
struct AddressRecord {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    street1: Option<String>,
    #[serde(default)]
    street2: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    residential: Option<bool>,
    #[serde(default)]
    verifications: Option<Verifications>,
}

#[derive(Debug, Deserialize)]
struct Verifications {
    #[serde(default)]
    delivery: Option<Verification>,
    #[serde(default)]
    zip4: Option<Zip4Verification>,
}

#[derive(Debug, Deserialize)]
struct Verification {
    success: bool,
    #[serde(default)]
    errors: Vec<VerificationError>,
}

#[derive(Debug, Deserialize)]
struct VerificationError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Zip4Verification {
    success: bool,
    #[serde(default)]
    zip4: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}

impl EasyPostClient {
    /// Create a client authenticated with the given API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self, EasyPostError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(EasyPostClientInner {
                client,
                api_key,
                base_url: API_BASE.to_owned(),
            }),
        })
    }

    /// Point the client at a different base URL. Used by tests to target
    /// a local stub server.
    #[must_use]
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EasyPostClientInner {
                client: self.inner.client.clone(),
                api_key: self.inner.api_key.clone(),
                base_url: base_url.into(),
            }),
        }
    }

    /// Submit an address for delivery verification and map the result
    /// onto a checkout verification outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or parsing fails. The
    /// [`AddressVerifier`] adapter degrades those to `Unverifiable`.
    #[instrument(skip(self, address), fields(state = %address.state, postal_code = %address.postal_code))]
    pub async fn verify_address(
        &self,
        address: &ShippingAddress,
    ) -> Result<VerificationOutcome, EasyPostError> {
        let request = CreateAddressRequest {
            address: AddressPayload {
                name: &address.name,
                street1: &address.line1,
                street2: address.line2.as_deref(),
                city: &address.city,
                state: &address.state,
                zip: &address.postal_code,
                country: &address.country,
            },
            verify: &["delivery"],
        };
        let response = self
            .inner
            .client
            .post(format!("{}/v2/addresses", self.inner.base_url))
            .basic_auth(self.inner.api_key.expose_secret(), None::<&str>)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(EasyPostError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let record: AddressRecord = serde_json::from_slice(&body)?;
        Ok(map_outcome(address, record))
    }
}

fn map_outcome(input: &ShippingAddress, record: AddressRecord) -> VerificationOutcome {
    let Some(delivery) = record
        .verifications
        .as_ref()
        .and_then(|v| v.delivery.as_ref())
    else {
        return VerificationOutcome::Unverifiable {
            reasons: vec!["No delivery verification returned.".to_owned()],
        };
    };

    if !delivery.success {
        let mut reasons: Vec<String> = delivery
            .errors
            .iter()
            .filter_map(|e| e.message.clone())
            .collect();
        if reasons.is_empty() {
            reasons.push("Address could not be verified for delivery.".to_owned());
        }
        return VerificationOutcome::Unverifiable { reasons };
    }

    let zip4 = record
        .verifications
        .as_ref()
        .and_then(|v| v.zip4.as_ref())
        .filter(|z| z.success)
        .and_then(|z| z.zip4.clone());
    let normalized = ShippingAddress {
        name: record.name.unwrap_or_else(|| input.name.clone()),
        line1: record.street1.unwrap_or_else(|| input.line1.clone()),
        line2: record.street2.filter(|s| !s.is_empty()),
        city: record.city.unwrap_or_else(|| input.city.clone()),
        state: record.state.unwrap_or_else(|| input.state.clone()),
        postal_code: record.zip.unwrap_or_else(|| input.postal_code.clone()),
        country: record.country.unwrap_or_else(|| input.country.clone()),
    };
    let validated = ValidatedAddress {
        residential: record.residential.unwrap_or(false),
        deliverable: true,
        zip4,
        diagnostics: Vec::new(),
        address: normalized,
    };

    // The carrier's normalized form counts as the same address when it
    // only differs in casing; anything more is offered as a suggestion
    // for the customer to adopt, never applied silently.
    if same_address(input, &validated.address) {
        VerificationOutcome::Verified(validated)
    } else {
        VerificationOutcome::Suggestions(vec![validated])
    }
}

fn same_address(a: &ShippingAddress, b: &ShippingAddress) -> bool {
    fn eq(x: &str, y: &str) -> bool {
        x.trim().eq_ignore_ascii_case(y.trim())
    }
    eq(&a.line1, &b.line1)
        && a.line2.as_deref().unwrap_or("") == b.line2.as_deref().unwrap_or("")
        && eq(&a.city, &b.city)
        && eq(&a.state, &b.state)
        && eq(&a.postal_code, &b.postal_code)
        && eq(&a.country, &b.country)
}

impl AddressVerifier for EasyPostClient {
    async fn verify(&self, address: &ShippingAddress) -> VerificationOutcome {
        match self.verify_address(address).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Verification is advisory; an outage degrades to
                // "unverifiable" rather than surfacing an error state.
                tracing::warn!(error = %e, "address verification unavailable");
                VerificationOutcome::Unverifiable {
                    reasons: vec!["Address verification is temporarily unavailable.".to_owned()],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> ShippingAddress {
        ShippingAddress {
            name: "Jordan Reyes".into(),
            line1: "1100 congress ave".into(),
            line2: None,
            city: "austin".into(),
            state: "tx".into(),
            postal_code: "78701".into(),
            country: "US".into(),
        }
    }

    fn record(street1: &str, success: bool) -> AddressRecord {
        AddressRecord {
            name: Some("Jordan Reyes".into()),
            street1: Some(street1.into()),
            street2: None,
            city: Some("Austin".into()),
            state: Some("TX".into()),
            zip: Some("78701".into()),
            country: Some("US".into()),
            residential: Some(true),
            verifications: Some(Verifications {
                delivery: Some(Verification {
                    success,
                    errors: Vec::new(),
                }),
                zip4: Some(Zip4Verification {
                    success: true,
                    zip4: Some("4313".into()),
                }),
            }),
        }
    }

    #[test]
    fn casing_only_normalization_verifies_in_place() {
        let outcome = map_outcome(&input(), record("1100 Congress Ave", true));
        match outcome {
            VerificationOutcome::Verified(validated) => {
                assert!(validated.deliverable);
                assert_eq!(validated.zip4.as_deref(), Some("4313"));
            }
            other => panic!("expected Verified, got {other:?}"),
        }
    }

    #[test]
    fn substantive_normalization_becomes_a_suggestion() {
        let outcome = map_outcome(&input(), record("1100 Congress Avenue", true));
        match outcome {
            VerificationOutcome::Suggestions(suggestions) => {
                assert_eq!(suggestions.len(), 1);
                assert_eq!(suggestions[0].address.line1, "1100 Congress Avenue");
            }
            other => panic!("expected Suggestions, got {other:?}"),
        }
    }

    #[test]
    fn failed_delivery_verification_reports_reasons() {
        let mut failed = record("1100 Congress Ave", false);
        if let Some(v) = failed.verifications.as_mut() {
            if let Some(d) = v.delivery.as_mut() {
                d.errors.push(VerificationError {
                    message: Some("Address not found".into()),
                });
            }
        }
        let outcome = map_outcome(&input(), failed);
        assert_eq!(
            outcome,
            VerificationOutcome::Unverifiable {
                reasons: vec!["Address not found".to_owned()],
            }
        );
    }

    #[test]
    fn missing_verification_block_is_unverifiable() {
        let mut bare = record("1100 Congress Ave", true);
        bare.verifications = None;
        assert!(matches!(
            map_outcome(&input(), bare),
            VerificationOutcome::Unverifiable { .. }
        ));
    }
}
