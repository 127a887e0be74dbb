//! Daemon lifecycle state machine.
//!
//! ```text
//! Starting ──▶ Ready ──▶ Draining ──▶ Stopped
//!    │           │                      ▲
//!    └───────────┴──────────────────────┘   (startup failure / fatal fault)
//! ```
//!
//! The state lives in a single [`watch`] channel owned by [`Lifecycle`].
//! Other components hold a [`LifecycleHandle`] and can only observe it or
//! request a shutdown.

use std::fmt;

use tokio::sync::watch;
use tracing::info;

/// Process-wide daemon state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl DaemonState {
    pub fn as_str(self) -> &'static str {
        match self {
            DaemonState::Starting => "starting",
            DaemonState::Ready => "ready",
            DaemonState::Draining => "draining",
            DaemonState::Stopped => "stopped",
        }
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition_to(self, to: DaemonState) -> bool {
        use DaemonState::*;
        matches!(
            (self, to),
            (Starting, Ready)
                | (Starting, Stopped)
                | (Ready, Draining)
                | (Ready, Stopped)
                | (Draining, Stopped)
        )
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("illegal lifecycle transition: {from} -> {to}")]
    IllegalTransition { from: DaemonState, to: DaemonState },
}

/// Sole owner of the daemon state.
#[derive(Debug)]
pub struct Lifecycle {
    state_tx: watch::Sender<DaemonState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Lifecycle {
    /// A lifecycle in the `Starting` state.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(DaemonState::Starting);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state_tx,
            shutdown_tx,
        }
    }

    pub fn state(&self) -> DaemonState {
        *self.state_tx.borrow()
    }

    /// Move to `to`, rejecting edges the state machine does not allow.
    pub fn transition(&self, to: DaemonState) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.state_tx.send_if_modified(|current| {
            let from = *current;
            if from.can_transition_to(to) {
                *current = to;
                true
            } else {
                result = Err(LifecycleError::IllegalTransition { from, to });
                false
            }
        });
        if result.is_ok() {
            info!(state = %to, "Daemon state changed");
        }
        result
    }

    /// A read-only handle for other components.
    pub fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            state_rx: self.state_tx.subscribe(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Resolves once a termination has been requested through any handle.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        // Sender is owned by `self`, so `wait_for` cannot fail while we run.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the lifecycle: read the state, watch it change, or
/// ask the daemon to shut down.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    state_rx: watch::Receiver<DaemonState>,
    shutdown_tx: watch::Sender<bool>,
}

impl LifecycleHandle {
    pub fn state(&self) -> DaemonState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<DaemonState> {
        self.state_rx.clone()
    }

    /// Wait until the daemon reaches `target`, or any state after it.
    pub async fn wait_for(&self, target: DaemonState) -> DaemonState {
        let mut rx = self.state_rx.clone();
        let reached = rx
            .wait_for(|state| order(*state) >= order(target))
            .await
            .map(|state| *state);
        // A dropped sender means the lifecycle is gone; treat that as stopped.
        reached.unwrap_or(DaemonState::Stopped)
    }

    /// Ask the daemon to begin draining. Idempotent.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn shutdown_pending(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

fn order(state: DaemonState) -> u8 {
    match state {
        DaemonState::Starting => 0,
        DaemonState::Ready => 1,
        DaemonState::Draining => 2,
        DaemonState::Stopped => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_initial_state_is_starting() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), DaemonState::Starting);
        assert_eq!(lifecycle.handle().state(), DaemonState::Starting);
    }

    #[test]
    fn test_happy_path_transitions() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();
        for next in [
            DaemonState::Ready,
            DaemonState::Draining,
            DaemonState::Stopped,
        ] {
            lifecycle.transition(next).unwrap();
            assert_eq!(handle.state(), next);
        }
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.transition(DaemonState::Draining),
            Err(LifecycleError::IllegalTransition {
                from: DaemonState::Starting,
                to: DaemonState::Draining,
            })
        );
        assert_eq!(lifecycle.state(), DaemonState::Starting);

        lifecycle.transition(DaemonState::Ready).unwrap();
        assert!(lifecycle.transition(DaemonState::Starting).is_err());
        assert!(lifecycle.transition(DaemonState::Ready).is_err());

        lifecycle.transition(DaemonState::Stopped).unwrap();
        for to in [
            DaemonState::Starting,
            DaemonState::Ready,
            DaemonState::Draining,
            DaemonState::Stopped,
        ] {
            assert!(lifecycle.transition(to).is_err(), "stopped -> {to}");
        }
    }

    #[test]
    fn test_fault_paths_go_straight_to_stopped() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(DaemonState::Stopped).unwrap();

        let lifecycle = Lifecycle::new();
        lifecycle.transition(DaemonState::Ready).unwrap();
        lifecycle.transition(DaemonState::Stopped).unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_observes_later_states() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();

        let waiter = tokio::spawn(async move { handle.wait_for(DaemonState::Ready).await });
        lifecycle.transition(DaemonState::Ready).unwrap();
        lifecycle.transition(DaemonState::Draining).unwrap();

        let reached = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            reached,
            DaemonState::Ready | DaemonState::Draining
        ));
    }

    #[tokio::test]
    async fn test_shutdown_request_wakes_owner() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();
        assert!(!handle.shutdown_pending());

        handle.request_shutdown();
        handle.request_shutdown();
        assert!(handle.shutdown_pending());

        tokio::time::timeout(Duration::from_secs(1), lifecycle.shutdown_requested())
            .await
            .unwrap();
    }
}
