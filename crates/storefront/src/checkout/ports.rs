//! Port traits between the orchestrator and its external collaborators.
//!
//! The payment processor SDK hands back opaque session and element
//! objects; these traits capture exactly the operations the orchestrator
//! needs from them (create, mount capture, finalize, confirm, calculate
//! tax) so the concrete SDK is swappable and mockable.

use std::future::Future;

use thiserror::Error;

use opticworks_core::{
    CartItem, CheckoutSessionId, Email, Price, ShippingAddress, ValidatedAddress,
};

/// Errors surfaced by the payment gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The processor rejected the payment; the message is shown to the
    /// customer verbatim.
    #[error("{message}")]
    Declined { message: String },

    /// The processor was unreachable or returned an unexpected response.
    #[error("payment service error: {0}")]
    Service(String),

    /// The request exceeded the configured timeout.
    #[error("payment service timed out")]
    Timeout,
}

/// Request to open a new checkout session for a cart snapshot.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub items: Vec<CartItem>,
}

/// Totals known at session creation. Tax arrives later, once an address
/// is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTotals {
    pub subtotal: Price,
    pub shipping: Price,
}

/// A newly created checkout session.
#[derive(Debug, Clone)]
pub struct SessionCreated {
    pub session: CheckoutSessionId,
    /// Client secret authorizing payment capture for this session.
    pub client_secret: String,
    pub totals: SessionTotals,
}

/// Terminal outcome of a confirmation call.
///
/// Redirect-based completion (3-D Secure style out-of-band flows) is a
/// first-class success path, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The processor confirmed the payment directly.
    Succeeded { session: CheckoutSessionId },
    /// The payment completed after an out-of-band redirect flow.
    RedirectCompleted { session: CheckoutSessionId },
}

impl ConfirmOutcome {
    /// The session id carried by either success path.
    #[must_use]
    pub const fn session(&self) -> &CheckoutSessionId {
        match self {
            Self::Succeeded { session } | Self::RedirectCompleted { session } => session,
        }
    }
}

/// A mounted address/payment capture surface.
///
/// Completeness is reported by the surface itself, mirroring the hosted
/// element's `complete` flag; the orchestrator never infers it.
pub trait CaptureSurface {
    /// Feed the latest raw address input into the surface.
    fn address_changed(&mut self, address: &ShippingAddress);

    /// Whether the surface has captured a complete address and payment
    /// method.
    fn is_complete(&self) -> bool;

    /// Release the surface. Safe to call more than once.
    fn unmount(&mut self);
}

/// The payment processor, as the orchestrator sees it.
pub trait PaymentGateway: Send + Sync + 'static {
    type Capture: CaptureSurface + Send;

    /// Create a server-side checkout session carrying the cart snapshot.
    fn create_session(
        &self,
        request: SessionRequest,
    ) -> impl Future<Output = Result<SessionCreated, GatewayError>> + Send;

    /// Attach the address/payment capture surface for a session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the capture surface cannot be attached.
    fn mount_capture(&self, session: &CheckoutSessionId) -> Result<Self::Capture, GatewayError>;

    /// Record the customer email and the final tax amount on the
    /// session before confirmation. The charged total becomes
    /// `subtotal + shipping + tax`.
    fn finalize(
        &self,
        session: &CheckoutSessionId,
        email: &Email,
        tax: Price,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Drive the payment to a terminal outcome.
    fn confirm(
        &self,
        session: &CheckoutSessionId,
    ) -> impl Future<Output = Result<ConfirmOutcome, GatewayError>> + Send;

    /// Compute the authoritative tax amount for a cart and address.
    fn calculate_tax(
        &self,
        items: &[CartItem],
        address: &ShippingAddress,
    ) -> impl Future<Output = Result<Price, GatewayError>> + Send;
}

/// The outcome of address verification.
///
/// Every variant is advisory; the customer explicitly adopts a
/// suggestion, nothing is auto-applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The address verified; the payload is the normalized form.
    Verified(ValidatedAddress),
    /// The address did not verify as entered; candidate corrections.
    Suggestions(Vec<ValidatedAddress>),
    /// Verification could not be performed. Checkout proceeds at the
    /// customer's own risk; never silently treated as verified.
    Unverifiable { reasons: Vec<String> },
}

/// The address verification service, as the orchestrator sees it.
///
/// Implementations degrade network and service failures to
/// [`VerificationOutcome::Unverifiable`] rather than erroring.
pub trait AddressVerifier: Send + Sync + 'static {
    fn verify(
        &self,
        address: &ShippingAddress,
    ) -> impl Future<Output = VerificationOutcome> + Send;
}
