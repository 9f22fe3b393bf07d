//! End-to-end checkout flow: cart to confirmed payment.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::advance;

use opticworks_core::{CartItem, CheckoutSessionId, Price, ProductId};
use opticworks_integration_tests::{TestGateway, TestVerifier, austin_address, settle, tint_kit};
use opticworks_storefront::cart::CartStore;
use opticworks_storefront::checkout::{
    CheckoutEvent, CheckoutHandle, CheckoutOrchestrator, CheckoutSettings, CheckoutStatus,
    GatewayError, TaxDisplay,
};

fn launch(gateway: TestGateway, cart: CartStore) -> (CheckoutHandle, Arc<TestVerifier>) {
    let verifier = Arc::new(TestVerifier::default());
    let (orchestrator, handle) = CheckoutOrchestrator::new(
        Arc::new(gateway),
        Arc::clone(&verifier),
        cart,
        CheckoutSettings::default(),
    );
    tokio::spawn(orchestrator.run());
    (handle, verifier)
}

#[test]
fn cart_total_is_the_sum_of_line_totals() {
    let cart = CartStore::new();
    cart.add_item(tint_kit());
    cart.add_item(tint_kit()); // same product: quantity bumps to 2
    cart.add_item(CartItem::new("squeegee", "Install Squeegee", Price::from_cents(899)));

    assert_eq!(cart.total_items(), 3);
    assert_eq!(cart.total_price(), Price::from_cents(2 * 14999 + 899));

    cart.update_quantity(&ProductId::from("squeegee"), 0); // below 1 removes the line
    assert_eq!(cart.total_price(), Price::from_cents(2 * 14999));
    assert!(cart.snapshot().iter().all(|item| item.quantity >= 1));
}

#[tokio::test(start_paused = true)]
async fn kit_checkout_confirms_with_the_expected_total() {
    // kit-1 at $149.99, Texas tax $12.37, no shipping: $162.36 total.
    let cart = CartStore::new();
    cart.add_item(tint_kit());
    let gateway = TestGateway::new().with_tax("TX", 1237, Duration::ZERO);
    let (handle, verifier) = launch(gateway, cart.clone());
    settle().await;
    assert_eq!(handle.view().status, CheckoutStatus::Ready);
    assert_eq!(handle.view().subtotal, Price::from_cents(14999));

    handle
        .send(CheckoutEvent::EmailEntered("jordan@example.com".into()))
        .await;
    handle
        .send(CheckoutEvent::AddressEdited(austin_address()))
        .await;
    settle().await;
    advance(Duration::from_millis(1000)).await;
    settle().await;

    let view = handle.view();
    assert_eq!(view.tax, TaxDisplay::Amount(Price::from_cents(1237)));
    assert_eq!(view.total, Some(Price::from_cents(16236)));
    assert_eq!(verifier.calls.lock().expect("lock").len(), 1);

    handle.send(CheckoutEvent::Submitted).await;
    settle().await;

    let view = handle.view();
    assert_eq!(view.status, CheckoutStatus::Confirmed);
    assert_eq!(view.session, Some(CheckoutSessionId::new("cs_test_1")));
    assert!(cart.is_empty(), "confirmation clears the cart");
}

#[tokio::test(start_paused = true)]
async fn decline_then_successful_retry() {
    let cart = CartStore::new();
    cart.add_item(tint_kit());
    let gateway = TestGateway::new()
        .with_tax("TX", 1237, Duration::ZERO)
        .with_confirm_script(vec![
            Err(GatewayError::Declined {
                message: "card declined".into(),
            }),
            Ok(opticworks_storefront::checkout::ConfirmOutcome::Succeeded {
                session: CheckoutSessionId::new("cs_test_1"),
            }),
        ]);
    let (handle, _verifier) = launch(gateway, cart.clone());
    settle().await;

    handle
        .send(CheckoutEvent::EmailEntered("jordan@example.com".into()))
        .await;
    handle
        .send(CheckoutEvent::AddressEdited(austin_address()))
        .await;
    settle().await;
    advance(Duration::from_millis(1000)).await;
    settle().await;

    handle.send(CheckoutEvent::Submitted).await;
    settle().await;

    let view = handle.view();
    assert_eq!(view.status, CheckoutStatus::Ready, "decline is not terminal");
    assert_eq!(view.error.as_deref(), Some("card declined"));
    assert!(!cart.is_empty(), "decline keeps the cart");

    handle.send(CheckoutEvent::Submitted).await;
    settle().await;
    assert_eq!(handle.view().status, CheckoutStatus::Confirmed);
    assert!(cart.is_empty());
}

#[tokio::test(start_paused = true)]
async fn moving_state_recalculates_tax_and_total() {
    let cart = CartStore::new();
    cart.add_item(tint_kit());
    let gateway = TestGateway::new()
        .with_tax("TX", 1237, Duration::ZERO)
        .with_tax("CA", 1463, Duration::ZERO);
    let (handle, _verifier) = launch(gateway, cart);
    settle().await;

    handle
        .send(CheckoutEvent::AddressEdited(austin_address()))
        .await;
    settle().await;
    advance(Duration::from_millis(1000)).await;
    settle().await;
    assert_eq!(handle.view().tax, TaxDisplay::Amount(Price::from_cents(1237)));

    let mut sf = austin_address();
    sf.line1 = "1 Market St".into();
    sf.city = "San Francisco".into();
    sf.state = "CA".into();
    sf.postal_code = "94105".into();
    handle.send(CheckoutEvent::AddressEdited(sf)).await;
    settle().await;
    advance(Duration::from_millis(1000)).await;
    settle().await;

    let view = handle.view();
    assert_eq!(view.tax, TaxDisplay::Amount(Price::from_cents(1463)));
    assert_eq!(view.total, Some(Price::from_cents(14999 + 1463)));
}
