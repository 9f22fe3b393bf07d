//! Core types for the OpticWorks checkout service.

pub mod address;
pub mod cart;
pub mod email;
pub mod id;
pub mod order;
pub mod price;

pub use address::{ShippingAddress, ValidatedAddress};
pub use cart::CartItem;
pub use email::{Email, EmailError};
pub use id::*;
pub use order::{Order, OrderNumber, OrderStatus};
pub use price::Price;
