//! Business services on top of the clients and the database.

pub mod email;
pub mod reconciler;

pub use email::{EmailSender, PaymentFailedNotice, ResendClient, ResendError};
pub use reconciler::{
    CustomerDirectory, OrderStore, ReconcileOutcome, Reconciler, ReconcilerError,
};
