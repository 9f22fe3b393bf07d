//! Shopping cart state container.
//!
//! The cart is the one piece of shared mutable checkout state. It is an
//! explicit container handed to the orchestrator rather than ambient global
//! state, so the state machine can be driven in tests without a UI runtime.

use std::sync::{Arc, Mutex, PoisonError};

use opticworks_core::{CartItem, Price, ProductId};

/// In-memory cart store with derived aggregates.
///
/// Cheaply cloneable; clones share the same underlying items. Only the
/// store's own operations mutate it - the orchestrator reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct CartStore {
    items: Arc<Mutex<Vec<CartItem>>>,
}

impl CartStore {
    /// Create an empty cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_items<R>(&self, f: impl FnOnce(&mut Vec<CartItem>) -> R) -> R {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut items)
    }

    /// Add a product to the cart.
    ///
    /// If an item with the same id exists, its quantity is incremented by
    /// one; otherwise the item is appended with quantity one.
    pub fn add_item(&self, product: CartItem) {
        self.with_items(|items| {
            if let Some(existing) = items.iter_mut().find(|i| i.id == product.id) {
                existing.quantity += 1;
            } else {
                items.push(CartItem {
                    quantity: 1,
                    ..product
                });
            }
        });
    }

    /// Set the quantity for an item.
    ///
    /// A quantity below one behaves as removal; quantities never go
    /// negative or zero.
    pub fn update_quantity(&self, id: &ProductId, quantity: u32) {
        if quantity < 1 {
            self.remove_item(id);
            return;
        }
        self.with_items(|items| {
            if let Some(item) = items.iter_mut().find(|i| &i.id == id) {
                item.quantity = quantity;
            }
        });
    }

    /// Remove an item entirely. Idempotent if the id is absent.
    pub fn remove_item(&self, id: &ProductId) {
        self.with_items(|items| items.retain(|i| &i.id != id));
    }

    /// Empty the cart. Called after a successful order.
    pub fn clear(&self) {
        self.with_items(Vec::clear);
    }

    /// Snapshot of the current line items.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CartItem> {
        self.with_items(|items| items.clone())
    }

    /// Total number of units across all items.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.with_items(|items| items.iter().map(|i| i.quantity).sum())
    }

    /// Sum of unit price times quantity over all items. Pure; no side
    /// effects.
    #[must_use]
    pub fn total_price(&self) -> Price {
        self.with_items(|items| items.iter().map(CartItem::line_total).sum())
    }

    /// Whether the cart has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.with_items(|items| items.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kit() -> CartItem {
        CartItem::new("kit-1", "Tesla Model 3 Tint Kit", Price::from_cents(14999))
    }

    fn film() -> CartItem {
        CartItem::new("film-xr", "XR Ceramic Film Roll", Price::from_cents(2500))
    }

    #[test]
    fn adding_same_product_increments_quantity() {
        let cart = CartStore::new();
        cart.add_item(kit());
        cart.add_item(kit());

        let items = cart.snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(items.first().map(|i| i.quantity), Some(2));
        assert_eq!(cart.total_items(), 2);
    }

    #[test]
    fn totals_track_any_operation_sequence() {
        let cart = CartStore::new();
        cart.add_item(kit());
        cart.add_item(film());
        cart.add_item(film());
        cart.update_quantity(&ProductId::new("kit-1"), 3);
        cart.remove_item(&ProductId::new("missing")); // idempotent no-op

        let expected: Price = cart.snapshot().iter().map(CartItem::line_total).sum();
        assert_eq!(cart.total_price(), expected);
        assert_eq!(cart.total_price(), Price::from_cents(3 * 14999 + 2 * 2500));
        assert!(cart.snapshot().iter().all(|i| i.quantity >= 1));
    }

    #[test]
    fn zero_quantity_removes_the_item() {
        let cart = CartStore::new();
        cart.add_item(kit());
        cart.update_quantity(&ProductId::new("kit-1"), 0);
        assert!(cart.is_empty());
        assert_eq!(cart.total_price(), Price::ZERO);
    }

    #[test]
    fn clear_empties_everything() {
        let cart = CartStore::new();
        cart.add_item(kit());
        cart.add_item(film());
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.total_items(), 0);
    }

    #[test]
    fn clones_share_state() {
        let cart = CartStore::new();
        let view = cart.clone();
        cart.add_item(kit());
        assert_eq!(view.total_items(), 1);
    }
}
