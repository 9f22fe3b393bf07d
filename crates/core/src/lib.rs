//! OpticWorks Core - Shared domain types.
//!
//! This crate provides the common types used across the OpticWorks checkout
//! service: prices, ids, addresses, cart items, and order records.
//!
//! # Architecture
//!
//! The core crate contains only types and their invariants - no I/O, no
//! database access, no HTTP clients. This keeps it lightweight and allows it
//! to be used anywhere, including in test harnesses without a runtime.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices, emails, addresses, and
//!   order/cart records

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
