//! The checkout attempt state machine.
//!
//! States: `Uninitialized -> Initializing -> Ready -> Submitting ->
//! Confirmed | Failed`. Address validation and tax computation run
//! concurrently with `Ready` and are tracked on the view rather than as
//! separate states, since payment capture stays interactive while they
//! are in flight.
//!
//! Ordering discipline: every address-triggered lookup carries a
//! monotonically increasing sequence number. Starting a new lookup drops
//! (cancels) the in-flight future, and a completion is applied only when
//! its sequence number is still current, so the displayed tax always
//! reflects the latest address - never a superseded one.

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use opticworks_core::{CheckoutSessionId, Email, Price, ShippingAddress, ValidatedAddress};

use super::debounce::Debouncer;
use super::ports::{
    AddressVerifier, CaptureSurface, GatewayError, PaymentGateway, SessionRequest,
    VerificationOutcome,
};
use crate::cart::CartStore;

/// Capacity of the UI event channel.
const EVENT_BUFFER: usize = 32;

/// Lifecycle state of one checkout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutStatus {
    #[default]
    Uninitialized,
    /// Session creation in flight.
    Initializing,
    /// Capture surface mounted; accepting input.
    Ready,
    /// Payment confirmation in flight.
    Submitting,
    /// Terminal: payment confirmed.
    Confirmed,
    /// Terminal: the attempt could not start. Distinct from a declined
    /// confirmation, which returns to `Ready` for resubmission.
    Failed,
}

/// What the order-total line should show for tax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaxDisplay {
    /// No complete address captured yet.
    #[default]
    NotCalculated,
    /// A recalculation is in flight; the previous amount must not be
    /// shown as final.
    Calculating,
    /// Authoritative amount for the current address.
    Amount(Price),
    /// The last recalculation failed. Submission is blocked until a
    /// retry succeeds; the amount is never silently taken as zero.
    Unavailable,
}

/// UI events driving the state machine.
#[derive(Debug, Clone)]
pub enum CheckoutEvent {
    /// The customer edited the shipping address.
    AddressEdited(ShippingAddress),
    /// The customer explicitly adopted a verification suggestion. The
    /// whole address is replaced atomically.
    SuggestionAdopted(ValidatedAddress),
    /// The customer entered their email.
    EmailEntered(String),
    /// The customer pressed the pay button.
    Submitted,
    /// The customer navigated away.
    Abandoned,
}

/// Display snapshot published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckoutView {
    pub status: CheckoutStatus,
    pub subtotal: Price,
    pub shipping: Price,
    pub tax: TaxDisplay,
    /// `subtotal + shipping + tax`, only when tax is known.
    pub total: Option<Price>,
    /// Latest verification outcome for the current address input.
    pub verification: Option<VerificationOutcome>,
    /// An address verification request is scheduled or in flight.
    pub validating_address: bool,
    /// Message for the customer; cleared on the next successful action.
    pub error: Option<String>,
    /// Set on confirmation; carried to the success view.
    pub session: Option<CheckoutSessionId>,
}

/// Tuning for one checkout attempt.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Quiet window before address input triggers verification and tax.
    pub debounce: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
        }
    }
}

/// Handle held by the UI layer: sends events, observes the view.
#[derive(Debug, Clone)]
pub struct CheckoutHandle {
    events: mpsc::Sender<CheckoutEvent>,
    view: watch::Receiver<CheckoutView>,
}

impl CheckoutHandle {
    /// Send a UI event. Returns `false` if the attempt already ended.
    pub async fn send(&self, event: CheckoutEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// The current display snapshot.
    #[must_use]
    pub fn view(&self) -> CheckoutView {
        self.view.borrow().clone()
    }

    /// Watch receiver for change notifications.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CheckoutView> {
        self.view.clone()
    }
}

type Inflight<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Await the future in `slot`, or pend forever when it is empty.
async fn next_done<T>(slot: &mut Option<Inflight<T>>) -> T {
    match slot.as_mut() {
        Some(f) => f.await,
        None => pending().await,
    }
}

/// Orchestrates one checkout attempt. See module docs for the state
/// machine and ordering discipline.
pub struct CheckoutOrchestrator<G: PaymentGateway, V: AddressVerifier> {
    attempt_id: Uuid,
    gateway: Arc<G>,
    verifier: Arc<V>,
    cart: CartStore,
    settings: CheckoutSettings,
    events: mpsc::Receiver<CheckoutEvent>,
    view_tx: watch::Sender<CheckoutView>,

    status: CheckoutStatus,
    session: Option<CheckoutSessionId>,
    capture: Option<G::Capture>,
    email: Option<Email>,
    /// Latest raw address input.
    address: Option<ShippingAddress>,
    /// Address the currently displayed tax amount belongs to.
    taxed_address: Option<ShippingAddress>,
    /// Address the in-flight tax request was issued for.
    pending_tax_address: Option<ShippingAddress>,
    verification: Option<VerificationOutcome>,
    validating: bool,
    subtotal: Price,
    shipping: Price,
    tax: TaxDisplay,
    error: Option<String>,
    /// Monotonic sequence for address-triggered lookups.
    seq: u64,
}

impl<G: PaymentGateway, V: AddressVerifier> CheckoutOrchestrator<G, V> {
    /// Create an orchestrator for one attempt over the given cart.
    #[must_use]
    pub fn new(
        gateway: Arc<G>,
        verifier: Arc<V>,
        cart: CartStore,
        settings: CheckoutSettings,
    ) -> (Self, CheckoutHandle) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (view_tx, view_rx) = watch::channel(CheckoutView::default());
        let orchestrator = Self {
            attempt_id: Uuid::new_v4(),
            gateway,
            verifier,
            cart,
            settings,
            events: event_rx,
            view_tx,
            status: CheckoutStatus::Uninitialized,
            session: None,
            capture: None,
            email: None,
            address: None,
            taxed_address: None,
            pending_tax_address: None,
            verification: None,
            validating: false,
            subtotal: Price::ZERO,
            shipping: Price::ZERO,
            tax: TaxDisplay::default(),
            error: None,
            seq: 0,
        };
        let handle = CheckoutHandle {
            events: event_tx,
            view: view_rx,
        };
        (orchestrator, handle)
    }

    /// Drive the attempt to a terminal state.
    ///
    /// Resolves when the payment confirms, the attempt fails to start,
    /// or the customer abandons checkout.
    pub async fn run(mut self) {
        if self.cart.is_empty() {
            tracing::warn!(attempt = %self.attempt_id, "checkout started with empty cart");
            self.status = CheckoutStatus::Failed;
            self.error = Some("Your cart is empty.".to_owned());
            self.push_view();
            return;
        }

        self.status = CheckoutStatus::Initializing;
        self.push_view();

        let request = SessionRequest {
            items: self.cart.snapshot(),
        };
        let created = match self.gateway.create_session(request).await {
            Ok(created) => created,
            Err(e) => {
                // Terminal for this attempt; the UI offers a retry action
                // which starts a fresh orchestrator.
                tracing::error!(attempt = %self.attempt_id, error = %e, "session creation failed");
                self.status = CheckoutStatus::Failed;
                self.error = Some(e.to_string());
                self.push_view();
                return;
            }
        };

        match self.gateway.mount_capture(&created.session) {
            Ok(capture) => self.capture = Some(capture),
            Err(e) => {
                tracing::error!(attempt = %self.attempt_id, error = %e, "capture mount failed");
                self.status = CheckoutStatus::Failed;
                self.error = Some(e.to_string());
                self.push_view();
                return;
            }
        }

        tracing::info!(
            attempt = %self.attempt_id,
            session = %created.session,
            subtotal = %created.totals.subtotal,
            "checkout session created"
        );
        self.subtotal = created.totals.subtotal;
        self.shipping = created.totals.shipping;
        self.session = Some(created.session);
        self.status = CheckoutStatus::Ready;
        self.push_view();

        let mut debounce = Debouncer::new(self.settings.debounce);
        let mut validation: Option<Inflight<(u64, VerificationOutcome)>> = None;
        let mut tax_request: Option<Inflight<(u64, Result<Price, GatewayError>)>> = None;

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(CheckoutEvent::AddressEdited(address)) => {
                            self.on_address_edited(address, &mut debounce);
                        }
                        Some(CheckoutEvent::SuggestionAdopted(validated)) => {
                            self.on_suggestion_adopted(
                                validated,
                                &mut debounce,
                                &mut validation,
                                &mut tax_request,
                            );
                        }
                        Some(CheckoutEvent::EmailEntered(raw)) => self.on_email_entered(&raw),
                        Some(CheckoutEvent::Submitted) => {
                            let recalc_pending = debounce.is_armed() || tax_request.is_some();
                            if self.on_submitted(recalc_pending).await {
                                return;
                            }
                        }
                        Some(CheckoutEvent::Abandoned) | None => {
                            self.release_capture();
                            tracing::info!(attempt = %self.attempt_id, "checkout abandoned");
                            return;
                        }
                    }
                }
                () = debounce.expired(), if debounce.is_armed() => {
                    debounce.disarm();
                    self.start_lookups(true, &mut validation, &mut tax_request);
                }
                (seq, outcome) = next_done(&mut validation) => {
                    validation = None;
                    if seq == self.seq {
                        self.validating = false;
                        self.verification = Some(outcome);
                        self.push_view();
                    }
                }
                (seq, result) = next_done(&mut tax_request) => {
                    tax_request = None;
                    if seq == self.seq {
                        self.on_tax_result(result);
                    }
                }
            }
        }
    }

    fn on_address_edited(&mut self, address: ShippingAddress, debounce: &mut Debouncer) {
        if let Some(capture) = self.capture.as_mut() {
            capture.address_changed(&address);
        }
        // A lookup result computed for the previous input must not be
        // applied to this one.
        self.seq += 1;
        let jurisdiction_moved = self
            .taxed_address
            .as_ref()
            .is_none_or(|taxed| taxed.tax_jurisdiction_differs(&address));
        if jurisdiction_moved && matches!(self.tax, TaxDisplay::Amount(_)) {
            // The shown amount belongs to the old jurisdiction; hide it
            // until the recalculation lands.
            self.tax = TaxDisplay::Calculating;
        }
        self.address = Some(address);
        self.verification = None;
        self.validating = true;
        self.error = None;
        debounce.touch();
        self.push_view();
    }

    /// Adopting a suggestion replaces the address wholesale - no partial
    /// merge - and skips re-verification since the suggestion came from
    /// the verifier.
    fn on_suggestion_adopted(
        &mut self,
        validated: ValidatedAddress,
        debounce: &mut Debouncer,
        validation: &mut Option<Inflight<(u64, VerificationOutcome)>>,
        tax_request: &mut Option<Inflight<(u64, Result<Price, GatewayError>)>>,
    ) {
        debounce.disarm();
        *validation = None;
        if let Some(capture) = self.capture.as_mut() {
            capture.address_changed(&validated.address);
        }
        self.address = Some(validated.address.clone());
        self.verification = Some(VerificationOutcome::Verified(validated));
        self.validating = false;
        self.error = None;
        self.start_lookups(false, validation, tax_request);
        self.push_view();
    }

    fn on_email_entered(&mut self, raw: &str) {
        match Email::parse(raw) {
            Ok(email) => {
                self.email = Some(email);
                self.error = None;
            }
            Err(e) => {
                self.email = None;
                self.error = Some(e.to_string());
            }
        }
        self.push_view();
    }

    /// Kick off verification (when `verify` is set) and, if the tax
    /// jurisdiction moved, tax recalculation for the current address.
    /// Replacing the in-flight slots drops superseded requests.
    fn start_lookups(
        &mut self,
        verify: bool,
        validation: &mut Option<Inflight<(u64, VerificationOutcome)>>,
        tax_request: &mut Option<Inflight<(u64, Result<Price, GatewayError>)>>,
    ) {
        let Some(address) = self.address.clone() else {
            return;
        };
        if !address.is_complete() {
            // A partially filled address is never submitted for
            // verification or tax.
            self.validating = false;
            self.push_view();
            return;
        }

        self.seq += 1;
        let seq = self.seq;

        if verify {
            let verifier = Arc::clone(&self.verifier);
            let to_verify = address.clone();
            *validation = Some(Box::pin(async move {
                (seq, verifier.verify(&to_verify).await)
            }));
            self.validating = true;
        }

        let jurisdiction_moved = self
            .taxed_address
            .as_ref()
            .is_none_or(|taxed| taxed.tax_jurisdiction_differs(&address));
        if jurisdiction_moved {
            let gateway = Arc::clone(&self.gateway);
            let items = self.cart.snapshot();
            let for_tax = address.clone();
            *tax_request = Some(Box::pin(async move {
                (seq, gateway.calculate_tax(&items, &for_tax).await)
            }));
            self.pending_tax_address = Some(address);
            self.tax = TaxDisplay::Calculating;
        }
        self.push_view();
    }

    fn on_tax_result(&mut self, result: Result<Price, GatewayError>) {
        match result {
            Ok(amount) => {
                self.tax = TaxDisplay::Amount(amount);
                self.taxed_address = self.pending_tax_address.take();
            }
            Err(e) => {
                tracing::warn!(attempt = %self.attempt_id, error = %e, "tax calculation failed");
                self.tax = TaxDisplay::Unavailable;
                self.taxed_address = None;
                self.pending_tax_address = None;
                self.error = Some(
                    "We could not calculate tax for this address. Please check the address and try again.".to_owned(),
                );
            }
        }
        self.push_view();
    }

    /// Handle a submission. Returns `true` when the attempt reached a
    /// terminal confirmed state and the loop should exit.
    async fn on_submitted(&mut self, recalc_pending: bool) -> bool {
        if self.status != CheckoutStatus::Ready {
            return false;
        }
        let Some(session) = self.session.clone() else {
            return false;
        };

        // Local validation: no network call is attempted while the
        // submission is incomplete.
        let Some(email) = self.email.clone() else {
            self.error = Some("Please enter your email address.".to_owned());
            self.push_view();
            return false;
        };
        if !self.capture.as_ref().is_some_and(CaptureSurface::is_complete) {
            self.error = Some("Please complete your shipping and payment details.".to_owned());
            self.push_view();
            return false;
        }
        // The total is money: never confirm against a stale or unknown
        // tax amount. A pending debounce or in-flight recalculation
        // means the shown amount may not match the address on file, and
        // an amount computed for a different jurisdiction never counts.
        let tax_stale = self
            .taxed_address
            .as_ref()
            .zip(self.address.as_ref())
            .is_some_and(|(taxed, current)| taxed.tax_jurisdiction_differs(current));
        if recalc_pending || tax_stale || self.tax == TaxDisplay::Calculating {
            self.error = Some("Hold on - your order total is still being calculated.".to_owned());
            self.push_view();
            return false;
        }
        let TaxDisplay::Amount(tax) = self.tax else {
            self.error = Some(
                "We could not calculate tax for this address. Please check the address and try again.".to_owned(),
            );
            self.push_view();
            return false;
        };

        self.status = CheckoutStatus::Submitting;
        self.error = None;
        self.push_view();

        if let Err(e) = self.gateway.finalize(&session, &email, tax).await {
            tracing::warn!(attempt = %self.attempt_id, error = %e, "session finalization failed");
            self.error = Some(e.to_string());
            self.status = CheckoutStatus::Ready;
            self.push_view();
            return false;
        }

        match self.gateway.confirm(&session).await {
            Ok(outcome) => {
                let session_id = outcome.session().clone();
                tracing::info!(
                    attempt = %self.attempt_id,
                    session = %session_id,
                    total = %(self.subtotal + self.shipping + tax),
                    "payment confirmed"
                );
                self.cart.clear();
                self.release_capture();
                self.status = CheckoutStatus::Confirmed;
                self.session = Some(session_id);
                self.push_view();
                true
            }
            Err(e) => {
                // Resubmittable: surface the processor's message verbatim
                // and keep the cart intact. No automatic retry.
                tracing::warn!(attempt = %self.attempt_id, error = %e, "confirmation failed");
                self.error = Some(e.to_string());
                self.status = CheckoutStatus::Ready;
                self.push_view();
                false
            }
        }
    }

    fn release_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.unmount();
        }
    }

    fn push_view(&self) {
        let total = match self.tax {
            TaxDisplay::Amount(tax) => Some(self.subtotal + self.shipping + tax),
            _ => None,
        };
        let view = CheckoutView {
            status: self.status,
            subtotal: self.subtotal,
            shipping: self.shipping,
            tax: self.tax,
            total,
            verification: self.verification.clone(),
            validating_address: self.validating,
            error: self.error.clone(),
            session: self.session.clone().filter(|_| self.status == CheckoutStatus::Confirmed),
        };
        // Receivers may all be gone during teardown; that is fine.
        let _ = self.view_tx.send(view);
    }
}
