//! Newtype IDs for type-safe entity references.
//!
//! Stripe and the product catalog both hand out opaque string identifiers
//! (`pi_...`, `cs_...`, `cus_...`, `kit-...`). The `define_id!` macro wraps
//! them so a payment-intent id can never be passed where a session id is
//! expected.

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<String>` / `From<&str>` implementations and `Display`
///
/// # Example
///
/// ```
/// # use opticworks_core::define_id;
/// define_id!(WarehouseId);
///
/// let id = WarehouseId::new("wh_123");
/// assert_eq!(id.as_str(), "wh_123");
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the underlying `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }
    };
}

// Catalog
define_id!(ProductId);

// Stripe entities
define_id!(CheckoutSessionId);
define_id!(PaymentIntentId);
define_id!(CustomerId);
define_id!(EventId);

impl PaymentIntentId {
    /// Short reference shown to customers on payment-failed notices,
    /// e.g. `pi_3Nxyzabcdef` becomes `PI-BCDEF...` style `PI-` codes.
    #[must_use]
    pub fn failure_reference(&self) -> String {
        let tail: String = self
            .as_str()
            .chars()
            .rev()
            .take(8)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("PI-{}", tail.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let product = ProductId::new("kit-1");
        assert_eq!(product.as_str(), "kit-1");
        assert_eq!(product.to_string(), "kit-1");
        assert_eq!(ProductId::from("kit-1"), product);
    }

    #[test]
    fn failure_reference_uses_last_eight_chars_uppercased() {
        let id = PaymentIntentId::new("pi_3abcdefghijklmnop");
        assert_eq!(id.failure_reference(), "PI-IJKLMNOP");
    }

    #[test]
    fn failure_reference_handles_short_ids() {
        let id = PaymentIntentId::new("pi_1");
        assert_eq!(id.failure_reference(), "PI-PI_1");
    }

    #[test]
    fn serde_is_transparent() {
        let id = EventId::new("evt_123");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"evt_123\"");
    }
}
