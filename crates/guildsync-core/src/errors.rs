//! Error hierarchy for the gateway engine.
//!
//! - [`GatewayError`]: top-level enum covering every failure class
//! - [`DecodeError`]: decompression failure, fatal to the connection
//! - [`MalformedEnvelope`]: one undecodable envelope, recoverable
//!
//! Errors classify themselves so the session can decide between dropping a
//! message, resuming, and a full resync.

use std::time::Duration;

use thiserror::Error;

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

// ─────────────────────────────────────────────────────────────────────────────
// GatewayError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for the gateway engine.
#[derive(Clone, Debug, Error)]
pub enum GatewayError {
    /// The compression stream is corrupt or the codec was misused.
    #[error("{0}")]
    Decode(#[from] DecodeError),

    /// A single envelope could not be decoded.
    #[error("{0}")]
    Malformed(#[from] MalformedEnvelope),

    /// A correlated request did not complete before its deadline.
    #[error("correlation {key} timed out after {}ms", .timeout.as_millis())]
    CorrelationTimeout {
        /// Correlation key (rendered).
        key: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A correlation with the same key is already in flight.
    #[error("correlation {key} is already pending")]
    DuplicateCorrelation {
        /// Correlation key (rendered).
        key: String,
    },

    /// The session was shut down while the operation was pending.
    #[error("gateway session closed")]
    SessionClosed,

    /// The transport failed or was closed by the remote.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote discarded the session; the next handshake must identify.
    #[error("session invalidated: {0}")]
    SessionInvalidated(String),

    /// The remote rejected the session with a non-recoverable close code.
    #[error("gateway closed with code {code}: {reason}")]
    Authentication {
        /// Close code.
        code: u16,
        /// Close reason sent by the remote.
        reason: String,
    },

    /// The external REST executor failed.
    #[error("REST {method} {path} failed: {message}")]
    Rest {
        /// HTTP method.
        method: String,
        /// Resource path.
        path: String,
        /// Failure description.
        message: String,
    },

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl GatewayError {
    /// Whether the connection can no longer be used after this error.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Transport(_) | Self::SessionInvalidated(_) | Self::Authentication { .. }
        )
    }

    /// Whether the session itself is over and must not reconnect.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Whether recovery requires a full identify (discarding cached state)
    /// rather than a resume.
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::SessionInvalidated(_))
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_ERROR",
            Self::Malformed(_) => "MALFORMED_ENVELOPE",
            Self::CorrelationTimeout { .. } => "CORRELATION_TIMEOUT",
            Self::DuplicateCorrelation { .. } => "DUPLICATE_CORRELATION",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::SessionInvalidated(_) => "SESSION_INVALIDATED",
            Self::Authentication { .. } => "AUTHENTICATION_FAILED",
            Self::Rest { .. } => "REST_ERROR",
            Self::InvalidState(_) => "INVALID_STATE",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DecodeError
// ─────────────────────────────────────────────────────────────────────────────

/// Decompression failure. The codec's stream state is undefined afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// `feed` was called before `init` (or after `close`).
    #[error("{codec}: no decompression context initialized")]
    NotInitialized {
        /// Codec name.
        codec: &'static str,
    },
    /// The underlying inflater rejected the input.
    #[error("{codec}: corrupted input: {message}")]
    Corrupted {
        /// Codec name.
        codec: &'static str,
        /// Message from the decompression primitive.
        message: String,
    },
    /// A complete message produced no output.
    #[error("{codec}: truncated input ({len} bytes produced no output)")]
    Truncated {
        /// Codec name.
        codec: &'static str,
        /// Size of the offending input.
        len: usize,
    },
    /// A previous failure left the codec unusable.
    #[error("{codec}: stream poisoned by an earlier failure")]
    Poisoned {
        /// Codec name.
        codec: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// MalformedEnvelope
// ─────────────────────────────────────────────────────────────────────────────

/// An envelope that failed to decode. Buffered state for later envelopes is
/// unaffected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("malformed envelope: {reason}")]
pub struct MalformedEnvelope {
    /// What went wrong.
    pub reason: String,
    /// Leading bytes of the offending input, lossily decoded.
    pub excerpt: String,
}

impl MalformedEnvelope {
    /// Maximum excerpt length kept for diagnostics.
    pub const EXCERPT_LEN: usize = 64;

    /// Build from a reason and the offending bytes.
    pub fn new(reason: impl Into<String>, bytes: &[u8]) -> Self {
        let end = bytes.len().min(Self::EXCERPT_LEN);
        Self {
            reason: reason.into(),
            excerpt: String::from_utf8_lossy(&bytes[..end]).into_owned(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decode_error_is_fatal_and_forces_resync() {
        let err = GatewayError::from(DecodeError::NotInitialized { codec: "zlib-stream" });
        assert!(err.is_connection_fatal());
        assert!(err.requires_resync());
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[test]
    fn transport_error_is_fatal_but_resumable() {
        let err = GatewayError::Transport("reset".into());
        assert!(err.is_connection_fatal());
        assert!(!err.requires_resync());
        assert!(!err.ends_session());
    }

    #[test]
    fn invalidated_session_forces_resync() {
        let err = GatewayError::SessionInvalidated("closed with code 4009".into());
        assert!(err.is_connection_fatal());
        assert!(err.requires_resync());
        assert!(!err.ends_session());
        assert_eq!(err.code(), "SESSION_INVALIDATED");
    }

    #[test]
    fn authentication_failure_ends_session() {
        let err = GatewayError::Authentication {
            code: 4004,
            reason: "bad token".into(),
        };
        assert!(err.is_connection_fatal());
        assert!(err.ends_session());
        assert!(!err.requires_resync());
    }

    #[test]
    fn malformed_envelope_is_recoverable() {
        let err = GatewayError::from(MalformedEnvelope::new("missing op", b"{}"));
        assert!(!err.is_connection_fatal());
        assert_matches!(err, GatewayError::Malformed(ref m) if m.excerpt == "{}");
    }

    #[test]
    fn excerpt_is_bounded() {
        let bytes = vec![b'x'; 500];
        let m = MalformedEnvelope::new("too long", &bytes);
        assert_eq!(m.excerpt.len(), MalformedEnvelope::EXCERPT_LEN);
    }

    #[test]
    fn correlation_timeout_display() {
        let err = GatewayError::CorrelationTimeout {
            key: "42".into(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "correlation 42 timed out after 1500ms");
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn duplicate_correlation_display() {
        let err = GatewayError::DuplicateCorrelation { key: "7".into() };
        assert_eq!(err.to_string(), "correlation 7 is already pending");
        assert_eq!(err.code(), "DUPLICATE_CORRELATION");
    }

    #[test]
    fn decode_error_display_names_codec() {
        let err = DecodeError::Truncated { codec: "zlib-stream", len: 4 };
        assert!(err.to_string().starts_with("zlib-stream"));
    }
}
