//! Structured events describing calls and signals a player absorbed.

use crate::state::{Operation, PlayerState};
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, info, warn};

/// An asynchronous signal delivered by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Prepared,
    Completion,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepared => "prepared",
            Self::Completion => "completion",
        })
    }
}

/// Something the player did instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// An operation was issued in a state that does not permit it and was ignored.
    IgnoredCall {
        operation: Operation,
        state: PlayerState,
    },
    /// A backend signal arrived in a state where it no longer applies.
    StaleSignal { signal: Signal, state: PlayerState },
    /// An error was not handled by the error callback and the player was reset.
    ErrorRecovery { error: String, state: PlayerState },
}

/// Sink for [`Diagnostic`] events.
pub trait DiagnosticsHook: Send + Sync {
    fn record(&self, event: Diagnostic);
}

/// Writes diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsHook for TracingDiagnostics {
    fn record(&self, event: Diagnostic) {
        match event {
            Diagnostic::IgnoredCall { operation, state } => {
                info!(%operation, %state, "Ignored {operation}(): player is {state}");
            }
            Diagnostic::StaleSignal { signal, state } => {
                debug!(%signal, %state, "Dropped stale {signal} signal while {state}");
            }
            Diagnostic::ErrorRecovery { error, state } => {
                warn!(%state, "An error occurred and the player was reset: {error}");
            }
        }
    }
}

/// Keeps diagnostics in memory, forwarding each one to `tracing` as well.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    /// The ignored calls recorded so far, in order.
    pub fn ignored_calls(&self) -> Vec<(Operation, PlayerState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Diagnostic::IgnoredCall { operation, state } => Some((*operation, *state)),
                _ => None,
            })
            .collect()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl DiagnosticsHook for RecordingDiagnostics {
    fn record(&self, event: Diagnostic) {
        TracingDiagnostics.record(event.clone());
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_filters_ignored_calls() {
        let hook = RecordingDiagnostics::new();
        hook.record(Diagnostic::IgnoredCall {
            operation: Operation::Start,
            state: PlayerState::Idle,
        });
        hook.record(Diagnostic::StaleSignal {
            signal: Signal::Prepared,
            state: PlayerState::Idle,
        });

        assert_eq!(hook.events().len(), 2);
        assert_eq!(
            hook.ignored_calls(),
            [(Operation::Start, PlayerState::Idle)]
        );
        assert_eq!(hook.drain().len(), 2);
        assert!(hook.events().is_empty());
    }
}
