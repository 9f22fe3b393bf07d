//! Checkout session orchestration.
//!
//! One [`orchestrator::CheckoutOrchestrator`] owns one checkout attempt
//! from session creation to a terminal confirmed/failed state. It is a
//! single-task event loop: UI events arrive on an mpsc channel, display
//! state leaves on a watch channel, and every network operation is an
//! awaited future with an explicit in-progress state.
//!
//! The concrete payment SDK and address verification service sit behind
//! the narrow port traits in [`ports`], so the whole state machine runs
//! under test with mock collaborators.

pub mod debounce;
pub mod orchestrator;
pub mod ports;

pub use orchestrator::{
    CheckoutEvent, CheckoutHandle, CheckoutOrchestrator, CheckoutSettings, CheckoutStatus,
    CheckoutView, TaxDisplay,
};
pub use ports::{
    AddressVerifier, CaptureSurface, ConfirmOutcome, GatewayError, PaymentGateway, SessionCreated,
    SessionRequest, SessionTotals, VerificationOutcome,
};
