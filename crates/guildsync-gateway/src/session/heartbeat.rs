//! Heartbeat timer and acknowledgement tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use guildsync_core::constants::opcode;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::state::{SessionState, StateCell};
use crate::dispatcher::EventDispatcher;
use crate::frame;
use crate::metrics::GATEWAY_HEARTBEAT_MISSED_TOTAL;
use crate::transport::OutboundFrame;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Too many heartbeats went unacknowledged.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
    /// The outbound channel closed.
    TransportClosed,
}

/// Tracks whether the last heartbeat was acknowledged, and the round trip.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    acked: AtomicBool,
    last_sent: Mutex<Option<Instant>>,
    latency: Mutex<Option<Duration>>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatMonitor {
    /// A monitor with nothing outstanding.
    pub fn new() -> Self {
        Self {
            acked: AtomicBool::new(true),
            last_sent: Mutex::new(None),
            latency: Mutex::new(None),
        }
    }

    /// Reset for a new connection.
    pub fn reset(&self) {
        self.acked.store(true, Ordering::Relaxed);
        *self.last_sent.lock() = None;
    }

    /// Record that a heartbeat went out.
    pub fn mark_sent(&self) {
        self.acked.store(false, Ordering::Relaxed);
        *self.last_sent.lock() = Some(Instant::now());
    }

    /// Record an acknowledgement. Returns the measured round trip.
    pub fn ack(&self) -> Option<Duration> {
        self.acked.store(true, Ordering::Relaxed);
        let rtt = self.last_sent.lock().take().map(|sent| sent.elapsed());
        if rtt.is_some() {
            *self.latency.lock() = rtt;
        }
        rtt
    }

    /// Whether the last heartbeat has been acknowledged.
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Relaxed)
    }

    /// Most recent round trip.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }
}

/// Everything one heartbeat loop needs.
pub struct HeartbeatTask {
    /// Ack tracking shared with the read loop.
    pub monitor: Arc<HeartbeatMonitor>,
    /// Interval announced by HELLO.
    pub interval: Duration,
    /// Unacknowledged beats tolerated before giving up.
    pub max_missed: u32,
    /// Source of the last sequence number.
    pub dispatcher: Arc<EventDispatcher>,
    /// Connection's outbound channel.
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Session state (Ready ↔ Degraded).
    pub state: StateCell,
}

/// Build a heartbeat frame carrying the last sequence seen.
pub fn heartbeat_frame(last_sequence: Option<u64>) -> OutboundFrame {
    let sequence = last_sequence.map_or(Value::Null, Value::from);
    OutboundFrame::Text(frame::encode(opcode::HEARTBEAT, &sequence))
}

/// Run heartbeats for one connection.
///
/// The first beat fires after `interval * jitter` (`jitter` in `[0, 1)`),
/// then every `interval`. At each beat, if the previous one is still
/// unacknowledged the miss counter increments: the first miss degrades a
/// `Ready` session, and reaching `max_missed` returns
/// [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(task: HeartbeatTask, jitter: f64, cancel: CancellationToken) -> HeartbeatResult {
    let HeartbeatTask {
        monitor,
        interval,
        max_missed,
        dispatcher,
        outbound,
        state,
    } = task;

    let first = interval.mul_f64(jitter.clamp(0.0, 1.0));
    let mut ticker = time::interval_at(Instant::now() + first, interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if monitor.is_acked() {
                    missed = 0;
                } else {
                    missed += 1;
                    counter!(GATEWAY_HEARTBEAT_MISSED_TOTAL).increment(1);
                    warn!(missed, max_missed, "heartbeat not acknowledged");
                    if missed == 1 {
                        let _ = state.transition_from(SessionState::Ready, SessionState::Degraded);
                    }
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
                let beat = heartbeat_frame(dispatcher.last_sequence());
                if outbound.send(beat).await.is_err() {
                    return HeartbeatResult::TransportClosed;
                }
                monitor.mark_sent();
                debug!(sequence = ?dispatcher.last_sequence(), "heartbeat sent");
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
