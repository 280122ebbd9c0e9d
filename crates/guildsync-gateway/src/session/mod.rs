//! The gateway session: one logical session spanning many connections.
//!
//! [`GatewaySession::run`] drives the connection loop. Each connection:
//!
//! 1. negotiates a fresh codec and opens the transport
//! 2. waits for HELLO, starts the heartbeat and sends IDENTIFY or RESUME
//! 3. feeds inbound frames through codec, frame decoder and dispatcher
//! 4. ends on shutdown, a close frame, a missed-ack timeout, op 7/9 or a
//!    decode failure
//!
//! Between connections the session backs off exponentially. A decode
//! failure, a non-resumable close or a non-resumable INVALID_SESSION discards
//! the session id, sequence, cache and pending correlations before the next
//! IDENTIFY.

pub mod heartbeat;
pub mod state;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use guildsync_core::constants::{close_code, event, opcode};
use guildsync_core::{GatewayError, GatewayResult, GuildId, UserId};
use guildsync_settings::GatewaySettings;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::{EntityCache, patch};
use crate::codec::{self, CompressionCodec};
use crate::correlation::{Completion, CorrelationRegistry};
use crate::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::frame::{self, Envelope, FrameDecoder};
use crate::metrics::{GATEWAY_MALFORMED_ENVELOPES_TOTAL, GATEWAY_RECONNECTS_TOTAL};
use crate::notify::{ClientEvent, ClonePolicy, NotificationSink};
use crate::transport::{Connector, OutboundFrame, TransportFrame, TransportLink};

pub use heartbeat::{HeartbeatMonitor, HeartbeatResult, HeartbeatTask, run_heartbeat};
pub use state::{SessionState, StateCell};

/// Close code that keeps the session resumable.
pub const CLOSE_RESUMABLE: u16 = 4000;
/// Close code that ends the session.
pub const CLOSE_NORMAL: u16 = 1000;

/// How a connection ended.
#[derive(Debug)]
enum Exit {
    Shutdown,
    Reconnect { resume: bool },
    Fatal(GatewayError),
}

enum Wake {
    Shutdown,
    Heartbeat(HeartbeatResult),
    Frame(Option<TransportFrame>),
}

struct Connection {
    codec: Box<dyn CompressionCodec>,
    decoder: FrameDecoder,
    outbound: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
    heartbeat: Option<JoinHandle<HeartbeatResult>>,
    established: bool,
}

/// A gateway client session.
pub struct GatewaySession {
    settings: GatewaySettings,
    connector: Arc<dyn Connector>,
    cache: Arc<EntityCache>,
    members: CorrelationRegistry<GuildId>,
    dispatcher: Arc<EventDispatcher>,
    events: broadcast::Sender<ClientEvent>,
    state: StateCell,
    session_id: Mutex<Option<String>>,
    outbound: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    heartbeat: Arc<HeartbeatMonitor>,
    shutdown: CancellationToken,
}

impl GatewaySession {
    /// Create a session. Fails if the settings are unusable or name an
    /// unknown codec.
    pub fn new(settings: GatewaySettings, connector: Arc<dyn Connector>) -> GatewayResult<Arc<Self>> {
        guildsync_settings::loader::validate(&settings)
            .map_err(|e| GatewayError::InvalidState(e.to_string()))?;
        let _ = codec::negotiate(&settings.compression)?;

        let (events, _) = broadcast::channel(settings.notifications.channel_capacity);
        let sink: Arc<dyn NotificationSink> = Arc::new(events.clone());
        let cache = Arc::new(EntityCache::new());
        let members = CorrelationRegistry::new();
        let clones = ClonePolicy::new(settings.notifications.disable_clones.iter().cloned());
        let dispatcher = Arc::new(EventDispatcher::with_default_handlers(
            Arc::clone(&cache),
            members.clone(),
            Arc::clone(&sink),
            clones,
        ));

        Ok(Arc::new(Self {
            settings,
            connector,
            cache,
            members,
            dispatcher,
            events,
            state: StateCell::new(sink),
            session_id: Mutex::new(None),
            outbound: Mutex::new(None),
            heartbeat: Arc::new(HeartbeatMonitor::new()),
            shutdown: CancellationToken::new(),
        }))
    }

    // ─── Observation ─────────────────────────────────────────────────────

    /// Receive change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Observe lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Last heartbeat round trip.
    pub fn ping(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// The entity cache.
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Settings the session was built with.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Id of the current session, if one can be resumed.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Last sequence number seen.
    pub fn last_sequence(&self) -> Option<u64> {
        self.dispatcher.last_sequence()
    }

    // ─── Outbound ────────────────────────────────────────────────────────

    /// Send a raw gateway payload on the current connection.
    pub async fn send(&self, op: u8, data: &Value) -> GatewayResult<()> {
        let outbound = self
            .outbound
            .lock()
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("no open connection".into()))?;
        outbound
            .send(OutboundFrame::Text(frame::encode(op, data)))
            .await
            .map_err(|_| GatewayError::Transport("connection closed".into()))
    }

    /// Ask the remote for a guild's members (answered by member chunks).
    pub async fn request_guild_members(&self, guild_id: GuildId, query: &str, limit: u32) -> GatewayResult<()> {
        self.send(
            opcode::REQUEST_GUILD_MEMBERS,
            &json!({ "guild_id": guild_id, "query": query, "limit": limit }),
        )
        .await
    }

    /// Fetch a guild's members and return the ids the remote sent.
    ///
    /// An unfiltered fetch of a guild whose member store is already complete
    /// resolves from the cache. Unfiltered fetches complete once the store
    /// reaches the guild's member count; filtered ones (non-empty `query` or
    /// non-zero `limit`) on the final chunk.
    pub async fn fetch_members(&self, guild_id: GuildId, query: &str, limit: u32) -> GatewayResult<Vec<UserId>> {
        let filtered = !query.is_empty() || limit > 0;
        if !filtered {
            if let Some(guild) = self.cache.guild(guild_id) {
                let guild = guild.read();
                if guild.is_fully_fetched() {
                    debug!(guild_id = %guild_id, "member store already complete");
                    return Ok(guild.members.ids());
                }
            }
        }

        let completion = if filtered {
            Completion::FinalChunk
        } else {
            Completion::ReachedTarget
        };
        let timeout = Duration::from_millis(self.settings.members.fetch_timeout_ms);
        let handle = self.members.register(guild_id, completion, timeout)?;

        if let Err(e) = self.request_guild_members(guild_id, query, limit).await {
            let _ = self.members.cancel(&guild_id, e.clone());
            return Err(e);
        }

        let result = handle.wait().await?;
        Ok(result
            .items("members")
            .filter_map(|member| member.get("user").and_then(Value::as_object))
            .filter_map(|user| patch::id::<UserId>(user, "id"))
            .collect())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Run the session on a background task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<GatewayResult<()>> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run().await })
    }

    /// Stop the session: close the connection, reject pending correlations
    /// and move to `Disconnected`.
    pub fn shutdown(&self) {
        info!("gateway session shutting down");
        self.shutdown.cancel();
        self.close_session();
    }

    /// Connect and keep the session alive until shutdown or a fatal close.
    pub async fn run(&self) -> GatewayResult<()> {
        let mut attempt: u32 = 0;
        let mut resume = true;

        let outcome = loop {
            if self.shutdown.is_cancelled() {
                break Ok(());
            }
            let _ = self.state.transition(SessionState::Connecting);

            let span = info_span!("gateway.connection", attempt, resume);
            let (exit, established) = self.connection().instrument(span).await;
            if established {
                attempt = 0;
            }

            match exit {
                Exit::Shutdown => break Ok(()),
                Exit::Fatal(e) => break Err(e),
                Exit::Reconnect { resume: next } => {
                    attempt = attempt.saturating_add(1);
                    if self.settings.reconnect.exhausted(attempt) {
                        error!(attempt, "reconnect attempts exhausted");
                        break Err(GatewayError::Transport(format!(
                            "gave up after {attempt} failed connection attempts"
                        )));
                    }
                    counter!(GATEWAY_RECONNECTS_TOTAL, "resume" => next.to_string()).increment(1);
                    let _ = self.state.transition(SessionState::Reconnecting);

                    let delay = self.settings.reconnect.delay(attempt - 1, rand::random());
                    info!(attempt, delay_ms = delay.as_millis(), resume = next, "reconnecting");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.shutdown.cancelled() => break Ok(()),
                    }
                    resume = next;
                }
            }
        };

        if let Err(e) = &outcome {
            error!(error = %e, code = e.code(), "gateway session ended");
        }
        self.close_session();
        outcome
    }

    fn close_session(&self) {
        *self.outbound.lock() = None;
        let rejected = self.members.reject_all(&GatewayError::SessionClosed);
        if rejected > 0 {
            debug!(rejected, "pending correlations rejected");
        }
        let _ = self.state.transition(SessionState::Disconnected);
    }

    /// Discard everything tied to the current session before a fresh IDENTIFY.
    fn resync(&self, cause: &GatewayError) {
        warn!(error = %cause, "discarding session state for full resync");
        *self.session_id.lock() = None;
        self.dispatcher.reset_sequence();
        self.cache.clear();
        let rejected = self.members.reject_all(cause);
        if rejected > 0 {
            debug!(rejected, "pending correlations rejected");
        }
    }

    // ─── Connection ──────────────────────────────────────────────────────

    async fn connection(&self) -> (Exit, bool) {
        let mut codec = match codec::negotiate(&self.settings.compression) {
            Ok(codec) => codec,
            Err(e) => return (Exit::Fatal(e), false),
        };
        codec.init();
        let url = self.settings.connect_url(codec.stream_parameter());

        let connected = tokio::select! {
            result = self.connector.connect(&url) => result,
            () = self.shutdown.cancelled() => return (Exit::Shutdown, false),
        };
        let TransportLink { mut inbound, outbound } = match connected {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, url = %url, "connect failed");
                return (self.recover(e).unwrap_or(Exit::Reconnect { resume: true }), false);
            }
        };
        debug!(url = %url, codec = codec.name(), "transport open");

        self.heartbeat.reset();
        *self.outbound.lock() = Some(outbound.clone());
        let mut conn = Connection {
            codec,
            decoder: FrameDecoder::new(),
            outbound,
            cancel: self.shutdown.child_token(),
            heartbeat: None,
            established: false,
        };

        let exit = loop {
            let wake = tokio::select! {
                () = self.shutdown.cancelled() => Wake::Shutdown,
                result = heartbeat_exit(&mut conn.heartbeat) => Wake::Heartbeat(result),
                frame = inbound.recv() => Wake::Frame(frame),
            };
            let step = match wake {
                Wake::Shutdown => Some(Exit::Shutdown),
                Wake::Heartbeat(result) => {
                    conn.heartbeat = None;
                    heartbeat_failure(&result).and_then(|cause| self.recover(cause))
                }
                Wake::Frame(None) => {
                    warn!("transport ended without a close frame");
                    Some(Exit::Reconnect { resume: true })
                }
                Wake::Frame(Some(TransportFrame::Close { code, reason })) => Some(self.on_close(code, &reason)),
                Wake::Frame(Some(frame)) => self.on_frame(&mut conn, &frame).await,
            };
            if let Some(exit) = step {
                break exit;
            }
        };

        conn.cancel.cancel();
        if let Some(handle) = conn.heartbeat.take() {
            handle.abort();
        }
        conn.codec.close();
        *self.outbound.lock() = None;

        let close = match &exit {
            Exit::Reconnect { resume: true } => Some(CLOSE_RESUMABLE),
            Exit::Reconnect { resume: false } | Exit::Shutdown => Some(CLOSE_NORMAL),
            Exit::Fatal(_) => None,
        };
        if let Some(code) = close {
            let _ = conn
                .outbound
                .send(OutboundFrame::Close {
                    code,
                    reason: String::new(),
                })
                .await;
        }
        (exit, conn.established)
    }

    async fn on_frame(&self, conn: &mut Connection, frame: &TransportFrame) -> Option<Exit> {
        let bytes: Cow<'_, [u8]> = match frame {
            TransportFrame::Binary(bytes) => match conn.codec.feed(bytes) {
                Ok(out) => Cow::Owned(out),
                Err(e) => {
                    error!(error = %e, codec = conn.codec.name(), "decompression failed");
                    return self.recover(GatewayError::Decode(e));
                }
            },
            // Text frames are never compressed.
            TransportFrame::Text(text) => Cow::Borrowed(text.as_bytes()),
            TransportFrame::Close { .. } => return None,
        };

        for result in conn.decoder.push(&bytes) {
            match result {
                Ok(envelope) => {
                    if let Some(exit) = self.on_envelope(conn, envelope).await {
                        return Some(exit);
                    }
                }
                Err(err) => {
                    counter!(GATEWAY_MALFORMED_ENVELOPES_TOTAL).increment(1);
                    warn!(error = %err, excerpt = %err.excerpt, "dropping malformed envelope");
                    if let Some(exit) = self.recover(err.into()) {
                        return Some(exit);
                    }
                }
            }
        }
        None
    }

    async fn on_envelope(&self, conn: &mut Connection, envelope: Envelope) -> Option<Exit> {
        match envelope.op {
            opcode::DISPATCH => {
                self.on_dispatch(conn, &envelope);
                None
            }
            opcode::HELLO => {
                self.on_hello(conn, &envelope.data).await;
                None
            }
            opcode::HEARTBEAT => {
                let beat = heartbeat::heartbeat_frame(self.dispatcher.last_sequence());
                if conn.outbound.send(beat).await.is_ok() {
                    self.heartbeat.mark_sent();
                }
                None
            }
            opcode::HEARTBEAT_ACK => {
                if let Some(rtt) = self.heartbeat.ack() {
                    debug!(rtt_ms = rtt.as_millis(), "heartbeat acknowledged");
                }
                let _ = self.state.transition_from(SessionState::Degraded, SessionState::Ready);
                None
            }
            opcode::RECONNECT => {
                info!("remote requested reconnect");
                Some(Exit::Reconnect { resume: true })
            }
            opcode::INVALID_SESSION => {
                let resumable = envelope.data.as_bool().unwrap_or(false);
                warn!(resumable, "session invalidated");
                if resumable {
                    Some(Exit::Reconnect { resume: true })
                } else {
                    self.recover(GatewayError::SessionInvalidated("remote sent INVALID_SESSION".into()))
                }
            }
            op => {
                debug!(op, "ignoring opcode");
                None
            }
        }
    }

    fn on_dispatch(&self, conn: &mut Connection, envelope: &Envelope) {
        let outcome = self.dispatcher.dispatch(envelope);
        match envelope.event.as_deref() {
            Some(event::READY) if outcome == DispatchOutcome::Handled => {
                let session_id = envelope
                    .data
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                if session_id.is_none() {
                    warn!("READY without session_id, resume disabled");
                }
                *self.session_id.lock() = session_id;
                conn.established = true;
                let _ = self.state.transition(SessionState::Ready);
            }
            Some(event::RESUMED) => {
                info!(seq = ?self.dispatcher.last_sequence(), "session resumed");
                conn.established = true;
                let _ = self.state.transition(SessionState::Ready);
            }
            _ => {}
        }
    }

    async fn on_hello(&self, conn: &mut Connection, data: &Value) {
        let Some(interval_ms) = data
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
        else {
            counter!(GATEWAY_MALFORMED_ENVELOPES_TOTAL).increment(1);
            warn!("HELLO without a usable heartbeat_interval");
            return;
        };

        if let Some(previous) = conn.heartbeat.take() {
            previous.abort();
        }
        let task = HeartbeatTask {
            monitor: Arc::clone(&self.heartbeat),
            interval: Duration::from_millis(interval_ms),
            max_missed: self.settings.heartbeat.missed_acks_before_reconnect,
            dispatcher: Arc::clone(&self.dispatcher),
            outbound: conn.outbound.clone(),
            state: self.state.clone(),
        };
        conn.heartbeat = Some(tokio::spawn(run_heartbeat(task, rand::random(), conn.cancel.clone())));

        let session_id = self.session_id.lock().clone();
        let (op, payload, next) = match (session_id, self.dispatcher.last_sequence()) {
            (Some(session_id), Some(seq)) => (
                opcode::RESUME,
                json!({ "token": self.settings.token, "session_id": session_id, "seq": seq }),
                SessionState::Resuming,
            ),
            _ => (
                opcode::IDENTIFY,
                self.identify_payload(conn.codec.payload_compression()),
                SessionState::Identifying,
            ),
        };
        let _ = self.state.transition(next);
        if conn.outbound.send(OutboundFrame::Text(frame::encode(op, &payload))).await.is_ok() {
            info!(heartbeat_ms = interval_ms, resume = op == opcode::RESUME, "handshake sent");
        }
    }

    fn identify_payload(&self, compress: bool) -> Value {
        let identify = &self.settings.identify;
        json!({
            "token": self.settings.token,
            "properties": {
                "os": identify.os,
                "browser": identify.browser,
                "device": identify.device,
            },
            "compress": compress,
            "large_threshold": self.settings.large_threshold,
            "intents": self.settings.intents,
        })
    }

    fn on_close(&self, code: Option<u16>, reason: &str) -> Exit {
        let cause = match code {
            Some(code) if close_code::is_fatal(code) => GatewayError::Authentication {
                code,
                reason: reason.to_owned(),
            },
            Some(code) if close_code::requires_resync(code) => {
                GatewayError::SessionInvalidated(format!("closed with code {code}: {reason}"))
            }
            _ => {
                info!(code = ?code, reason, "transport closed by remote");
                GatewayError::Transport(format!("closed by remote: {reason}"))
            }
        };
        self.recover(cause).unwrap_or(Exit::Reconnect { resume: true })
    }

    /// Decide how the session continues after `cause`. `None` keeps the
    /// current connection open.
    fn recover(&self, cause: GatewayError) -> Option<Exit> {
        if !cause.is_connection_fatal() {
            return None;
        }
        if cause.ends_session() {
            *self.session_id.lock() = None;
            return Some(Exit::Fatal(cause));
        }
        if cause.requires_resync() {
            self.resync(&cause);
            return Some(Exit::Reconnect { resume: false });
        }
        debug!(error = %cause, "connection lost, session resumable");
        Some(Exit::Reconnect { resume: true })
    }
}

fn heartbeat_failure(result: &HeartbeatResult) -> Option<GatewayError> {
    match result {
        HeartbeatResult::TimedOut => {
            warn!("heartbeat acknowledgements stopped, reconnecting");
            Some(GatewayError::Transport("heartbeat acknowledgements stopped".into()))
        }
        HeartbeatResult::TransportClosed => Some(GatewayError::Transport("outbound channel closed".into())),
        HeartbeatResult::Cancelled => None,
    }
}

async fn heartbeat_exit(handle: &mut Option<JoinHandle<HeartbeatResult>>) -> HeartbeatResult {
    match handle {
        Some(handle) => handle.await.unwrap_or(HeartbeatResult::Cancelled),
        None => std::future::pending().await,
    }
}
