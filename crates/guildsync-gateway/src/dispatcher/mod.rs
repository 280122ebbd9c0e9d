//! Routes decoded envelopes to cache handlers and pending correlations.
//!
//! The dispatcher tracks the last sequence number for heartbeats and resume,
//! then looks the event name up in its handler registry. Unknown event names
//! are ignored; a handler that rejects its payload produces a
//! [`MalformedEnvelope`] but never interrupts the stream.

mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use guildsync_core::constants::opcode;
use guildsync_core::{GuildId, MalformedEnvelope};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::cache::EntityCache;
use crate::correlation::CorrelationRegistry;
use crate::frame::Envelope;
use crate::metrics::{GATEWAY_DISPATCH_TOTAL, GATEWAY_MALFORMED_ENVELOPES_TOTAL};
use crate::notify::{ClientEvent, ClonePolicy, NotificationSink};

/// Result of an event handler.
pub type HandlerResult = Result<(), MalformedEnvelope>;

/// Everything a handler may touch.
pub struct DispatchContext<'a> {
    /// The entity cache.
    pub cache: &'a EntityCache,
    /// Pending member requests, keyed by guild.
    pub members: &'a CorrelationRegistry<GuildId>,
    /// Notification destination.
    pub sink: &'a dyn NotificationSink,
    /// Which events carry "old" snapshots.
    pub clones: &'a ClonePolicy,
}

impl DispatchContext<'_> {
    /// Whether `event` wants a before-snapshot.
    pub fn keep_old(&self, event: &str) -> bool {
        self.clones.keep_old(event)
    }

    /// Publish a notification.
    pub fn emit(&self, event: ClientEvent) {
        self.sink.emit(event);
    }
}

/// Handler for one dispatch event.
pub trait EventHandler: Send + Sync {
    /// Apply the event's payload.
    fn handle(&self, data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Map<String, Value>, &DispatchContext<'_>) -> HandlerResult + Send + Sync,
{
    fn handle(&self, data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
        self(data, ctx)
    }
}

/// What [`EventDispatcher::dispatch`] did with an envelope.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler applied the event.
    Handled,
    /// No handler is registered for the event.
    Unhandled,
    /// The envelope is not a dispatch (only its sequence was recorded).
    NotDispatch,
    /// The handler rejected the payload.
    Rejected(MalformedEnvelope),
}

/// Event router.
pub struct EventDispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    cache: Arc<EntityCache>,
    members: CorrelationRegistry<GuildId>,
    sink: Arc<dyn NotificationSink>,
    clones: ClonePolicy,
    last_sequence: Mutex<Option<u64>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new(
        cache: Arc<EntityCache>,
        members: CorrelationRegistry<GuildId>,
        sink: Arc<dyn NotificationSink>,
        clones: ClonePolicy,
    ) -> Self {
        Self {
            handlers: HashMap::new(),
            cache,
            members,
            sink,
            clones,
            last_sequence: Mutex::new(None),
        }
    }

    /// Create a dispatcher with every built-in cache handler registered.
    pub fn with_default_handlers(
        cache: Arc<EntityCache>,
        members: CorrelationRegistry<GuildId>,
        sink: Arc<dyn NotificationSink>,
        clones: ClonePolicy,
    ) -> Self {
        let mut dispatcher = Self::new(cache, members, sink, clones);
        handlers::register_all(&mut dispatcher);
        dispatcher
    }

    /// Register (or replace) the handler for `event`.
    pub fn register(&mut self, event: &str, handler: impl EventHandler + 'static) {
        let _ = self.handlers.insert(event.to_owned(), Arc::new(handler));
    }

    /// Whether a handler is registered for `event`.
    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The entity cache handlers write to.
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Highest sequence number seen on the current session.
    pub fn last_sequence(&self) -> Option<u64> {
        *self.last_sequence.lock()
    }

    /// Forget the sequence (new session).
    pub fn reset_sequence(&self) {
        *self.last_sequence.lock() = None;
    }

    /// Record a sequence number. Regressions are logged and ignored.
    pub fn observe_sequence(&self, sequence: u64) {
        let mut last = self.last_sequence.lock();
        match *last {
            Some(previous) if sequence < previous => {
                warn!(previous, sequence, "sequence regressed, keeping previous");
            }
            Some(previous) if sequence > previous + 1 => {
                debug!(previous, sequence, "sequence gap");
                *last = Some(sequence);
            }
            _ => *last = Some(sequence),
        }
    }

    /// Route one envelope.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        if let Some(sequence) = envelope.sequence {
            self.observe_sequence(sequence);
        }
        if envelope.op != opcode::DISPATCH {
            return DispatchOutcome::NotDispatch;
        }
        let Some(event) = envelope.event.as_deref() else {
            return Self::reject(MalformedEnvelope::new("dispatch without event name", b""));
        };

        let Some(handler) = self.handlers.get(event) else {
            trace!(event, "no handler for event");
            return DispatchOutcome::Unhandled;
        };
        counter!(GATEWAY_DISPATCH_TOTAL, "event" => event.to_owned()).increment(1);

        let Some(data) = envelope.data.as_object() else {
            return Self::reject(MalformedEnvelope::new(
                format!("{event} payload is not an object"),
                envelope.data.to_string().as_bytes(),
            ));
        };

        let ctx = DispatchContext {
            cache: &self.cache,
            members: &self.members,
            sink: self.sink.as_ref(),
            clones: &self.clones,
        };
        match handler.handle(data, &ctx) {
            Ok(()) => DispatchOutcome::Handled,
            Err(err) => {
                warn!(event, error = %err, excerpt = %err.excerpt, "event rejected");
                Self::reject(err)
            }
        }
    }

    fn reject(err: MalformedEnvelope) -> DispatchOutcome {
        counter!(GATEWAY_MALFORMED_ENVELOPES_TOTAL).increment(1);
        DispatchOutcome::Rejected(err)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::notify::RecordingSink;

    pub(crate) struct Harness {
        pub dispatcher: EventDispatcher,
        pub cache: Arc<EntityCache>,
        pub members: CorrelationRegistry<GuildId>,
        pub sink: Arc<RecordingSink>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            Self::with_clones(ClonePolicy::default())
        }

        pub(crate) fn with_clones(clones: ClonePolicy) -> Self {
            let cache = Arc::new(EntityCache::new());
            let members = CorrelationRegistry::new();
            let sink = Arc::new(RecordingSink::default());
            let dispatcher =
                EventDispatcher::with_default_handlers(cache.clone(), members.clone(), sink.clone(), clones);
            Self {
                dispatcher,
                cache,
                members,
                sink,
            }
        }

        pub(crate) fn send(&self, event: &str, data: Value) -> DispatchOutcome {
            let sequence = self.dispatcher.last_sequence().unwrap_or(0) + 1;
            self.dispatcher.dispatch(&Envelope::dispatch(event, sequence, data))
        }

        pub(crate) fn events(&self) -> Vec<ClientEvent> {
            self.sink.events()
        }

        pub(crate) fn last_event(&self) -> ClientEvent {
            self.events().pop().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Harness;
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_event_is_ignored() {
        let harness = Harness::new();
        assert_eq!(harness.send("TYPING_START", json!({})), DispatchOutcome::Unhandled);
        assert!(harness.events().is_empty());
    }

    #[test]
    fn all_default_handlers_registered() {
        let harness = Harness::new();
        assert_eq!(harness.dispatcher.handler_count(), 19);
        assert!(harness.dispatcher.handles("GUILD_MEMBERS_CHUNK"));
    }

    #[test]
    fn sequence_is_monotonic() {
        let harness = Harness::new();
        let d = &harness.dispatcher;
        d.observe_sequence(1);
        d.observe_sequence(5);
        assert_eq!(d.last_sequence(), Some(5));
        d.observe_sequence(3);
        assert_eq!(d.last_sequence(), Some(5));
        d.reset_sequence();
        assert_eq!(d.last_sequence(), None);
    }

    #[test]
    fn non_dispatch_records_sequence_only() {
        let harness = Harness::new();
        let envelope = Envelope {
            op: opcode::HEARTBEAT_ACK,
            data: Value::Null,
            sequence: Some(9),
            event: None,
        };
        assert_eq!(harness.dispatcher.dispatch(&envelope), DispatchOutcome::NotDispatch);
        assert_eq!(harness.dispatcher.last_sequence(), Some(9));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let harness = Harness::new();
        assert!(matches!(
            harness.send("GUILD_UPDATE", json!([1, 2])),
            DispatchOutcome::Rejected(_)
        ));
    }

    #[test]
    fn missing_event_name_is_rejected() {
        let harness = Harness::new();
        let envelope = Envelope {
            op: opcode::DISPATCH,
            data: json!({}),
            sequence: Some(1),
            event: None,
        };
        assert!(matches!(harness.dispatcher.dispatch(&envelope), DispatchOutcome::Rejected(_)));
    }

    fn emit_resumed(_: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
        ctx.emit(ClientEvent::Resumed);
        Ok(())
    }

    #[test]
    fn custom_handler_replaces_default() {
        let mut harness = Harness::new();
        harness.dispatcher.register("USER_UPDATE", emit_resumed);
        assert_eq!(harness.send("USER_UPDATE", json!({})), DispatchOutcome::Handled);
        assert_eq!(harness.last_event().name(), "resumed");
    }
}
