//! Cart line items.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::Price;

/// A line item in the shopping cart.
///
/// Invariant: `quantity >= 1`. The cart store enforces this; removing the
/// last unit removes the item entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: ProductId,
    pub name: String,
    /// Unit price in the transaction currency.
    pub price: Price,
    pub quantity: u32,
    /// Product specification attributes (VLT percentage, window coverage,
    /// and similar catalog metadata). Opaque to the checkout flow.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl CartItem {
    /// Create a line item with quantity 1 and no specification attributes.
    #[must_use]
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Price) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            quantity: 1,
            attributes: BTreeMap::new(),
        }
    }

    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.price * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_scales_with_quantity() {
        let mut item = CartItem::new("kit-1", "Tesla Model 3 Tint Kit", Price::from_cents(14999));
        assert_eq!(item.line_total(), Price::from_cents(14999));

        item.quantity = 3;
        assert_eq!(item.line_total(), Price::from_cents(44997));
    }
}
