//! OpticWorks Storefront library.
//!
//! Exposes the checkout service as a library so the orchestrator, clients,
//! and reconciler can be exercised in tests without the binary.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod easypost;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod stripe;
