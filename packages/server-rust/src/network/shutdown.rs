//! Process lifecycle: state machine, root cancellation, in-flight tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions, a `CancellationToken` as
//! the single root cancellation signal, and an atomic counter with RAII
//! guards for in-flight request tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of the server.
///
/// State machine: Starting -> Serving -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Configuration, listener and routes are being set up.
    Starting,
    /// The listener is accepting connections.
    Serving,
    /// The listener is closed; in-flight requests are finishing.
    Draining,
    /// Terminal.
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Owns the root cancellation token and the lifecycle state.
///
/// 1. The signal watcher (or any other token holder) cancels the root token
/// 2. The serve loop observes it, calls `begin_drain()` and stops accepting
/// 3. Once in-flight requests finish (or the drain bound expires) the serve
///    loop calls `set_stopped()`
#[derive(Debug)]
pub struct LifecycleController {
    root: CancellationToken,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl LifecycleController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Starting)),
        }
    }

    /// Transitions to `Serving`.
    pub fn set_serving(&self) {
        self.state.store(Arc::new(LifecycleState::Serving));
    }

    /// Returns a clone of the root token. Cancelling any clone cancels the
    /// server.
    #[must_use]
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancels the root token.
    pub fn trigger_shutdown(&self) {
        self.root.cancel();
    }

    /// Whether the root token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Resolves once the root token is cancelled.
    pub async fn cancelled(&self) {
        self.root.cancelled().await;
    }

    /// Transitions to `Draining`. Called by the serve loop once it stops
    /// accepting.
    pub fn begin_drain(&self) {
        self.state.store(Arc::new(LifecycleState::Draining));
    }

    /// Transitions to the terminal `Stopped` state.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Creates an RAII guard that tracks an in-flight request.
    ///
    /// The counter is decremented when the guard is dropped, including
    /// during unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Returns the current number of in-flight requests.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_starting() {
        let controller = LifecycleController::new();
        assert_eq!(controller.state(), LifecycleState::Starting);
        assert_eq!(controller.in_flight_count(), 0);
        assert!(!controller.is_cancelled());
    }

    #[test]
    fn state_transitions_through_full_lifecycle() {
        let controller = LifecycleController::new();
        controller.set_serving();
        assert_eq!(controller.state(), LifecycleState::Serving);
        controller.begin_drain();
        assert_eq!(controller.state(), LifecycleState::Draining);
        controller.set_stopped();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn state_names() {
        assert_eq!(LifecycleState::Serving.as_str(), "serving");
        assert_eq!(LifecycleState::Draining.as_str(), "draining");
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = LifecycleController::new();

        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn cancelling_a_token_clone_cancels_the_root() {
        let controller = LifecycleController::new();
        let token = controller.root_token();

        token.cancel();
        controller.cancelled().await;
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn trigger_shutdown_wakes_waiters() {
        let controller = Arc::new(LifecycleController::new());
        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.cancelled().await })
        };

        controller.trigger_shutdown();
        waiter.await.unwrap();
    }
}
