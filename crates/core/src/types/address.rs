//! Postal address types for the checkout flow.

use serde::{Deserialize, Serialize};

/// A customer-entered shipping address.
///
/// Transient: owned by a single checkout attempt and persisted only as part
/// of a finalized order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ShippingAddress {
    /// Recipient name.
    pub name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    /// State or region code, e.g. `TX`.
    pub state: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code. Defaults to `US`.
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "US".to_owned()
}

impl ShippingAddress {
    /// Whether the address has every field required for verification.
    ///
    /// A partially filled address must never be submitted to the
    /// verification service; callers gate on this.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.line1.trim().is_empty()
            && !self.city.trim().is_empty()
            && !self.state.trim().is_empty()
            && !self.postal_code.trim().is_empty()
    }

    /// Whether a change from `self` to `other` affects tax computation.
    ///
    /// Tax jurisdictions hinge on state and postal code; edits to the
    /// street line alone do not require recalculation.
    #[must_use]
    pub fn tax_jurisdiction_differs(&self, other: &Self) -> bool {
        !self.state.eq_ignore_ascii_case(&other.state)
            || self.postal_code != other.postal_code
            || !self.country.eq_ignore_ascii_case(&other.country)
    }
}

/// The outcome of verifying a [`ShippingAddress`] against a truth source.
///
/// Never authoritative: a validated address is a suggestion the customer
/// must explicitly accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedAddress {
    /// The normalized address returned by the verification service.
    #[serde(flatten)]
    pub address: ShippingAddress,
    /// Whether the service classified the address as residential.
    pub residential: bool,
    /// Whether delivery-point verification succeeded.
    pub deliverable: bool,
    /// ZIP+4 extension when verification produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip4: Option<String>,
    /// Verification diagnostics (error codes and messages from the service).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}
