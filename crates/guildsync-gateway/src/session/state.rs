//! Connection lifecycle states and their legal transitions.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::notify::{ClientEvent, NotificationSink};

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No connection and none being attempted.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, identify sent.
    Identifying,
    /// Transport open, resume sent.
    Resuming,
    /// Session established and healthy.
    Ready,
    /// One heartbeat went unacknowledged.
    Degraded,
    /// Waiting out backoff before the next connection attempt.
    Reconnecting,
}

impl SessionState {
    /// Whether moving to `next` is allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Connecting, Degraded, Disconnected, Identifying, Ready, Reconnecting, Resuming,
        };
        if next == Disconnected {
            return self != Disconnected;
        }
        matches!(
            (self, next),
            (Disconnected | Reconnecting, Connecting)
                | (Connecting, Identifying | Resuming)
                | (Identifying | Resuming | Degraded, Ready)
                | (Ready, Degraded)
                | (Connecting | Identifying | Resuming | Ready | Degraded, Reconnecting)
        )
    }

    /// Whether the session can carry traffic.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Shared, observable session state.
///
/// Only legal transitions are applied; each one is logged and published as
/// [`ClientEvent::StateChanged`].
#[derive(Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<SessionState>>,
    sink: Arc<dyn NotificationSink>,
}

impl StateCell {
    /// Start in [`SessionState::Disconnected`].
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        let (tx, _rx) = watch::channel(SessionState::Disconnected);
        Self {
            tx: Arc::new(tx),
            sink,
        }
    }

    /// Current state.
    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `next` if legal. Returns whether the state changed.
    pub fn transition(&self, next: SessionState) -> bool {
        self.transition_if(next, |_| true)
    }

    /// Move to `next` only from `from`.
    pub fn transition_from(&self, from: SessionState, next: SessionState) -> bool {
        self.transition_if(next, |current| current == from)
    }

    fn transition_if(&self, next: SessionState, guard: impl Fn(SessionState) -> bool) -> bool {
        let mut previous = None;
        let changed = self.tx.send_if_modified(|current| {
            if !guard(*current) {
                return false;
            }
            if !current.can_transition_to(next) {
                if *current != next {
                    warn!(from = %current, to = %next, "illegal session transition ignored");
                }
                return false;
            }
            previous = Some(*current);
            *current = next;
            true
        });

        if let Some(from) = previous.filter(|_| changed) {
            match next {
                SessionState::Ready | SessionState::Disconnected => {
                    info!(from = %from, to = %next, "session state changed");
                }
                _ => debug!(from = %from, to = %next, "session state changed"),
            }
            self.sink.emit(ClientEvent::StateChanged { from, to: next });
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingSink;

    #[test]
    fn happy_path_transitions() {
        use SessionState::*;
        let path = [Disconnected, Connecting, Identifying, Ready, Degraded, Ready, Reconnecting, Connecting, Resuming, Ready, Disconnected];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn illegal_transitions() {
        use SessionState::*;
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Reconnecting.can_transition_to(Identifying));
        assert!(!Disconnected.can_transition_to(Disconnected));
        assert!(!Identifying.can_transition_to(Degraded));
    }

    #[test]
    fn cell_applies_only_legal_moves_and_notifies() {
        let sink = Arc::new(RecordingSink::default());
        let cell = StateCell::new(sink.clone());
        assert!(!cell.transition(SessionState::Ready));
        assert!(cell.transition(SessionState::Connecting));
        assert!(cell.transition(SessionState::Identifying));
        assert_eq!(cell.get(), SessionState::Identifying);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            ClientEvent::StateChanged { from: SessionState::Connecting, to: SessionState::Identifying }
        ));
    }

    #[test]
    fn transition_from_is_conditional() {
        let cell = StateCell::new(Arc::new(RecordingSink::default()));
        let _ = cell.transition(SessionState::Connecting);
        assert!(!cell.transition_from(SessionState::Ready, SessionState::Degraded));
        assert_eq!(cell.get(), SessionState::Connecting);
    }

    #[test]
    fn watchers_see_changes() {
        let cell = StateCell::new(Arc::new(RecordingSink::default()));
        let rx = cell.subscribe();
        let _ = cell.transition(SessionState::Connecting);
        assert_eq!(*rx.borrow(), SessionState::Connecting);
    }
}
