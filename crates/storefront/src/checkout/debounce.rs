//! Resettable debounce window for address input.
//!
//! Coalesces rapid repeated input events into one action: each `touch`
//! pushes the deadline out by the full window, so the action fires only
//! after input has been quiet for the whole window. A touch before the
//! deadline cancels the previously scheduled firing by construction.

use std::future::pending;
use std::time::Duration;

use tokio::time::Instant;

/// A resettable debounce timer.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Create a disarmed debouncer with the given quiet window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Record input activity, arming (or re-arming) the timer.
    pub fn touch(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    /// Cancel any pending firing.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Whether a firing is currently scheduled.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve when the quiet window has elapsed.
    ///
    /// Pends forever while disarmed, which makes it safe to use as a
    /// `select!` branch alongside an event stream.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => pending().await,
        }
    }
}
