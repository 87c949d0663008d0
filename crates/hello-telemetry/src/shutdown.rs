//! Ordered teardown of everything telemetry setup created.
//!
//! [`ShutdownChain`] accumulates teardown actions while setup proceeds and
//! runs them in strict reverse order exactly once. Errors from individual
//! actions are logged and swallowed so one failing component cannot keep the
//! rest from being released.

use crate::error::{BoxError, ShutdownError};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

type Action = Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>;

enum State {
    Accepting(Vec<(&'static str, Action)>),
    Draining,
    Drained,
}

/// Reverse-order teardown coordinator.
///
/// The chain starts *accepting*; the first call to
/// [`shutdown`](Self::shutdown) moves it to *draining* and later to a terminal
/// state in which further calls are no-ops. If the chain is dropped while
/// still accepting (for example because setup bailed out half way), the
/// accumulated actions run synchronously from `Drop`.
pub struct ShutdownChain {
    state: Mutex<State>,
}

impl std::fmt::Debug for ShutdownChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            State::Accepting(actions) => format!("Accepting({})", actions.len()),
            State::Draining => "Draining".to_string(),
            State::Drained => "Drained".to_string(),
        };
        f.debug_struct("ShutdownChain").field("state", &state).finish()
    }
}

impl Default for ShutdownChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownChain {
    /// Creates an empty, accepting chain.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Accepting(Vec::new())),
        }
    }

    /// Appends a teardown action.
    ///
    /// If the chain is no longer accepting, the action runs immediately so
    /// the resource it owns is still released.
    pub fn push<F>(&self, name: &'static str, action: F)
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        let mut state = self.state.lock();
        match &mut *state {
            State::Accepting(actions) => actions.push((name, Box::new(action))),
            State::Draining | State::Drained => {
                drop(state);
                tracing::warn!(
                    target: "otel_lifecycle",
                    component = name,
                    "Teardown registered after shutdown began; running it now"
                );
                run_action(name, Box::new(action));
            }
        }
    }

    /// Number of pending actions. Zero once shutdown has started.
    pub fn len(&self) -> usize {
        match &*self.state.lock() {
            State::Accepting(actions) => actions.len(),
            State::Draining | State::Drained => 0,
        }
    }

    /// Returns `true` when no actions are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every accumulated action in reverse order within `deadline`.
    ///
    /// Actions run on a detached thread because provider shutdown performs
    /// blocking flushes. If the deadline expires, the remaining actions are
    /// abandoned and [`ShutdownError::DeadlineExceeded`] is returned; the
    /// thread is not joined, so a stuck flush never holds up runtime or
    /// process exit. Any call after the first returns `Ok(())` without doing
    /// anything.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownError> {
        let actions = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Draining) {
                State::Accepting(actions) => actions,
                other => {
                    *state = other;
                    return Ok(());
                }
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("telemetry-shutdown".to_string())
            .spawn(move || {
                run_reversed(actions);
                let _ = done_tx.send(());
            });
        if let Err(e) = spawned {
            tracing::warn!(target: "otel_lifecycle", error = %e, "Failed to spawn teardown thread");
            *self.state.lock() = State::Drained;
            return Ok(());
        }

        let result = match tokio::time::timeout(deadline, done_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                tracing::warn!(target: "otel_lifecycle", "Teardown thread panicked");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    target: "otel_lifecycle",
                    deadline_ms = deadline.as_millis() as u64,
                    "Telemetry shutdown deadline exceeded; abandoning remaining teardown"
                );
                Err(ShutdownError::DeadlineExceeded(deadline))
            }
        };

        *self.state.lock() = State::Drained;
        result
    }
}

impl Drop for ShutdownChain {
    fn drop(&mut self) {
        let state = std::mem::replace(self.state.get_mut(), State::Drained);
        if let State::Accepting(actions) = state
            && !actions.is_empty()
        {
            run_reversed(actions);
        }
    }
}

fn run_reversed(actions: Vec<(&'static str, Action)>) {
    for (name, action) in actions.into_iter().rev() {
        run_action(name, action);
    }
}

fn run_action(name: &'static str, action: Action) {
    if let Err(e) = action() {
        tracing::warn!(target: "otel_lifecycle", component = name, error = %e, "Teardown failed");
    }
}
