//! Transport-level zlib stream shared by every frame of a connection.
//!
//! The remote compresses the whole stream with one zlib context and ends each
//! logical message with a sync flush. A message may span several transport
//! frames, so input is buffered until it ends with [`ZLIB_SUFFIX`]. The inflater
//! persists across messages: later messages reference the dictionary built by
//! earlier ones.

use flate2::{Decompress, FlushDecompress};
use guildsync_core::DecodeError;
use tracing::trace;

use super::{CompressionCodec, inflate_all};

/// Sync-flush marker that terminates each logical message.
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Streaming zlib codec (`zlib-stream`).
#[derive(Default)]
pub struct ZlibStream {
    inflater: Option<Decompress>,
    pending: Vec<u8>,
    poisoned: bool,
}

impl ZlibStream {
    /// Negotiation name.
    pub const NAME: &'static str = "zlib-stream";

    /// Create an uninitialized codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered while waiting for a message terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl CompressionCodec for ZlibStream {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload_compression(&self) -> bool {
        false
    }

    fn stream_parameter(&self) -> Option<&'static str> {
        Some(Self::NAME)
    }

    fn init(&mut self) {
        self.inflater = Some(Decompress::new(true));
        self.pending.clear();
        self.poisoned = false;
    }

    fn feed(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if self.poisoned {
            return Err(DecodeError::Poisoned { codec: Self::NAME });
        }
        let Some(inflater) = self.inflater.as_mut() else {
            return Err(DecodeError::NotInitialized { codec: Self::NAME });
        };

        self.pending.extend_from_slice(frame);
        if !self.pending.ends_with(&ZLIB_SUFFIX) {
            trace!(buffered = self.pending.len(), "partial zlib message");
            return Ok(Vec::new());
        }

        let input = std::mem::take(&mut self.pending);
        match inflate_all(inflater, &input, FlushDecompress::Sync) {
            Ok(out) if out.is_empty() => {
                self.poisoned = true;
                Err(DecodeError::Truncated {
                    codec: Self::NAME,
                    len: input.len(),
                })
            }
            Ok(out) => Ok(out),
            Err(e) => {
                self.poisoned = true;
                Err(DecodeError::Corrupted {
                    codec: Self::NAME,
                    message: e.to_string(),
                })
            }
        }
    }

    fn close(&mut self) {
        self.inflater = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::StreamCompressor;
    use assert_matches::assert_matches;

    fn ready() -> ZlibStream {
        let mut codec = ZlibStream::new();
        codec.init();
        codec
    }

    #[test]
    fn feed_before_init_fails() {
        let mut codec = ZlibStream::new();
        assert_matches!(codec.feed(b"abc"), Err(DecodeError::NotInitialized { .. }));
    }

    #[test]
    fn feed_after_close_fails() {
        let mut codec = ready();
        codec.close();
        assert_matches!(codec.feed(&ZLIB_SUFFIX), Err(DecodeError::NotInitialized { .. }));
    }

    #[test]
    fn decodes_consecutive_messages_sharing_context() {
        let mut remote = StreamCompressor::new();
        let mut codec = ready();

        let first = remote.frame(br#"{"op":10,"d":{"heartbeat_interval":41250}}"#);
        let second = remote.frame(br#"{"op":11}"#);
        assert!(first.ends_with(&ZLIB_SUFFIX));

        assert_eq!(
            codec.feed(&first).unwrap(),
            br#"{"op":10,"d":{"heartbeat_interval":41250}}"#
        );
        assert_eq!(codec.feed(&second).unwrap(), br#"{"op":11}"#);
    }

    #[test]
    fn message_split_across_frames_is_buffered() {
        let mut remote = StreamCompressor::new();
        let mut codec = ready();
        let payload = br#"{"op":0,"t":"READY","s":1,"d":{"session_id":"abc"}}"#;
        let frame = remote.frame(payload);
        let (head, tail) = frame.split_at(frame.len() / 2);

        assert!(codec.feed(head).unwrap().is_empty());
        assert_eq!(codec.pending_len(), head.len());
        assert_eq!(codec.feed(tail).unwrap(), payload);
        assert_eq!(codec.pending_len(), 0);
    }

    #[test]
    fn large_message_is_fully_drained() {
        let mut remote = StreamCompressor::new();
        let mut codec = ready();
        let payload: Vec<u8> = (0..500_000u32).map(|i| b'a' + (i % 26) as u8).collect();
        let frame = remote.frame(&payload);
        assert_eq!(codec.feed(&frame).unwrap(), payload);
    }

    #[test]
    fn corrupted_input_poisons_codec() {
        let mut remote = StreamCompressor::new();
        let mut codec = ready();
        let _ = codec.feed(&remote.frame(b"{}")).unwrap();

        // Reserved block type: the inflater must reject it.
        let garbage = [0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0xff, 0xff];
        assert_matches!(codec.feed(&garbage), Err(DecodeError::Corrupted { .. }));
        assert_matches!(
            codec.feed(&remote.frame(b"{}")),
            Err(DecodeError::Poisoned { .. })
        );
    }

    #[test]
    fn empty_output_is_truncation() {
        let mut remote = StreamCompressor::new();
        let mut codec = ready();
        let _ = codec.feed(&remote.frame(b"{}")).unwrap();
        // A bare sync-flush marker completes a message without producing output.
        assert_matches!(codec.feed(&ZLIB_SUFFIX), Err(DecodeError::Truncated { .. }));
    }

    #[test]
    fn init_resets_stream() {
        let mut codec = ready();
        let _ = codec.feed(&[0xff, 0xff, 0x00, 0x00, 0xff, 0xff]);
        codec.init();

        let mut remote = StreamCompressor::new();
        assert_eq!(codec.feed(&remote.frame(b"{\"op\":11}")).unwrap(), b"{\"op\":11}");
    }
}
