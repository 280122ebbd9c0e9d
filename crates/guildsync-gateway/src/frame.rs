//! Gateway envelopes and the incremental decoder that produces them.
//!
//! Decompressed output is not guaranteed to align with envelope boundaries:
//! one codec output may hold several envelopes, or the tail of one and the
//! head of the next. [`FrameDecoder`] buffers partial input and yields
//! envelopes strictly in wire order.

use guildsync_core::MalformedEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on bytes buffered without completing an envelope.
pub const MAX_BUFFERED: usize = 16 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded gateway message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opcode (see `guildsync_core::constants::opcode`).
    pub op: u8,
    /// Payload.
    #[serde(rename = "d", default)]
    pub data: Value,
    /// Sequence number, present on dispatches.
    #[serde(rename = "s", default)]
    pub sequence: Option<u64>,
    /// Event name, present on dispatches.
    #[serde(rename = "t", default)]
    pub event: Option<String>,
}

impl Envelope {
    /// Build an envelope from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Dispatch with `event` name and sequence `sequence`.
    pub fn dispatch(event: &str, sequence: u64, data: Value) -> Self {
        Self {
            op: guildsync_core::constants::opcode::DISPATCH,
            data,
            sequence: Some(sequence),
            event: Some(event.to_owned()),
        }
    }
}

/// Outbound message: only `op` and `d` are sent by clients.
#[derive(Debug, Serialize)]
pub struct OutboundPayload<'a> {
    /// Opcode.
    pub op: u8,
    /// Payload.
    pub d: &'a Value,
}

/// Encode an outbound message to its JSON text.
pub fn encode(op: u8, data: &Value) -> String {
    // Serializing a `Value` cannot fail.
    serde_json::to_string(&OutboundPayload { op, d: data }).unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// FrameDecoder
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental envelope decoder for one connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Set while discarding the rest of a document that failed to parse.
    discarding: Option<Discard>,
}

/// Bracket scanner for the remainder of a broken document. Objects nested
/// inside it are never surfaced as envelopes.
#[derive(Debug, Default)]
struct Discard {
    depth: usize,
    in_string: bool,
    escaped: bool,
    discarded: usize,
}

impl Discard {
    /// Scan `bytes` and return the offset just past the bracket that closes
    /// the broken document, if `bytes` contains it.
    fn advance(&mut self, bytes: &[u8]) -> Option<usize> {
        for (i, &b) in bytes.iter().enumerate() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        self.discarded += bytes.len();
        None
    }
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of an envelope.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discard buffered input.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = None;
    }

    /// Append decompressed bytes and return every envelope they complete.
    ///
    /// Undecodable input yields one [`MalformedEnvelope`] in its position.
    /// A broken document is skipped up to its closing bracket, even across
    /// later pushes; stray bytes outside any document are skipped up to the
    /// next `{` or `[`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Envelope, MalformedEnvelope>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        let mut consumed = 0usize;

        if let Some(discard) = self.discarding.as_mut() {
            match discard.advance(&self.buffer) {
                Some(end) => {
                    consumed = end;
                    self.discarding = None;
                }
                None => {
                    if discard.discarded > MAX_BUFFERED {
                        self.discarding = None;
                    }
                    self.buffer.clear();
                    return out;
                }
            }
        }

        loop {
            let Some(start) = self.buffer[consumed..]
                .iter()
                .position(|b| !b.is_ascii_whitespace())
            else {
                consumed = self.buffer.len();
                break;
            };
            consumed += start;
            let rest = &self.buffer[consumed..];

            let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
            match stream.next() {
                None => break,
                Some(Ok(value)) => {
                    let end = stream.byte_offset();
                    out.push(
                        Envelope::from_value(value)
                            .map_err(|e| MalformedEnvelope::new(e.to_string(), &rest[..end])),
                    );
                    consumed += end;
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) if matches!(rest[0], b'{' | b'[') => {
                    let mut discard = Discard::default();
                    if let Some(end) = discard.advance(rest) {
                        out.push(Err(MalformedEnvelope::new(e.to_string(), &rest[..end])));
                        consumed += end;
                    } else {
                        out.push(Err(MalformedEnvelope::new(e.to_string(), rest)));
                        consumed = self.buffer.len();
                        self.discarding = Some(discard);
                        break;
                    }
                }
                Some(Err(e)) => {
                    let skip = rest
                        .iter()
                        .position(|&b| b == b'{' || b == b'[')
                        .unwrap_or(rest.len());
                    out.push(Err(MalformedEnvelope::new(e.to_string(), &rest[..skip])));
                    consumed += skip;
                }
            }
        }

        let _ = self.buffer.drain(..consumed);

        if self.buffer.len() > MAX_BUFFERED {
            out.push(Err(MalformedEnvelope::new(
                format!("envelope exceeds {MAX_BUFFERED} bytes"),
                &self.buffer,
            )));
            self.buffer.clear();
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(results: Vec<Result<Envelope, MalformedEnvelope>>) -> Vec<Envelope> {
        results.into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn decodes_single_envelope() {
        let mut decoder = FrameDecoder::new();
        let envs = ok(decoder.push(br#"{"op":0,"d":{"a":1},"s":3,"t":"READY"}"#));
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].op, 0);
        assert_eq!(envs[0].sequence, Some(3));
        assert_eq!(envs[0].event.as_deref(), Some("READY"));
        assert_eq!(envs[0].data, json!({"a": 1}));
    }

    #[test]
    fn missing_optional_fields_default() {
        let mut decoder = FrameDecoder::new();
        let envs = ok(decoder.push(br#"{"op":11}"#));
        assert_eq!(envs[0].data, Value::Null);
        assert_eq!(envs[0].sequence, None);
        assert_eq!(envs[0].event, None);
    }

    #[test]
    fn multiple_envelopes_in_one_push_keep_order() {
        let mut decoder = FrameDecoder::new();
        let envs = ok(decoder.push(br#"{"op":0,"s":1,"t":"A"} {"op":0,"s":2,"t":"B"}{"op":11}"#));
        let seqs: Vec<_> = envs.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![Some(1), Some(2), None]);
    }

    #[test]
    fn partial_envelope_waits_for_rest() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(br#"{"op":0,"d":{"name":"gu"#).is_empty());
        assert!(decoder.buffered() > 0);
        let envs = ok(decoder.push(br#"ild"},"s":9,"t":"GUILD_UPDATE"}{"op":1"#));
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].data, json!({"name": "guild"}));
        let envs = ok(decoder.push(b"1}"));
        assert_eq!(envs[0].op, 11);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn non_envelope_value_is_malformed_but_recoverable() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(br#"{"d":1}{"op":11}"#);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().op, 11);
    }

    #[test]
    fn syntax_error_skips_to_next_object() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(br#"{"op":,"d":1}{"op":11}"#);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results.last().unwrap().as_ref().unwrap().op, 11);
    }

    #[test]
    fn nested_object_in_broken_envelope_is_not_surfaced() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(br#"{"op":0,"s":3,"t":"GUILD_UPDATE","d":{"op":7},}{"op":11}"#);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().op, 11);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn braces_inside_strings_do_not_end_broken_envelope() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(br#"{"op":,"d":{"name":"}{\"op\":7}"}}{"op":11}"#);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().op, 11);
    }

    #[test]
    fn broken_envelope_is_discarded_across_pushes() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(br#"{"op":0,,"d":{"#);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(decoder.buffered(), 0);

        assert!(decoder.push(br#""op":7,"d":null}"#).is_empty());
        let envs = ok(decoder.push(br#"}{"op":11}"#));
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].op, 11);
    }

    #[test]
    fn reset_stops_discarding() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(br#"{"op":,"d":{"#).len(), 1);
        decoder.reset();
        assert_eq!(ok(decoder.push(br#"{"op":11}"#))[0].op, 11);
    }

    #[test]
    fn garbage_prefix_is_reported_once() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(br#"xyz{"op":11}"#);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap_err().excerpt, "xyz");
        assert_eq!(results[1].as_ref().unwrap().op, 11);
    }

    #[test]
    fn encode_outbound() {
        let text = encode(1, &json!(42));
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({"op": 1, "d": 42}));
    }
}
