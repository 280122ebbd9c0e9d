//! Stateful decompression of inbound transport frames.
//!
//! A codec is created per connection and never reused: once a connection dies
//! its decompression context is unrecoverable. The codec is picked by name when
//! the connection is negotiated; see [`negotiate`].

mod passthrough;
mod zlib_payload;
mod zlib_stream;

pub use passthrough::Passthrough;
pub use zlib_payload::ZlibPayload;
pub use zlib_stream::{ZLIB_SUFFIX, ZlibStream};

use flate2::{Decompress, DecompressError, FlushDecompress, Status};
use guildsync_core::{DecodeError, GatewayError, GatewayResult};

/// Names accepted by [`negotiate`].
pub const SUPPORTED: [&str; 3] = [ZlibStream::NAME, ZlibPayload::NAME, Passthrough::NAME];

/// A streaming decompressor for one connection's inbound frames.
pub trait CompressionCodec: Send {
    /// Name advertised during negotiation.
    fn name(&self) -> &'static str;

    /// Whether the remote compresses individual payloads (the identify
    /// `compress` flag) rather than the whole stream.
    fn payload_compression(&self) -> bool;

    /// Value of the connection URL's `compress` parameter, for codecs that
    /// compress the whole transport stream.
    fn stream_parameter(&self) -> Option<&'static str> {
        None
    }

    /// Allocate decompression state. Calling it again starts a fresh stream.
    fn init(&mut self);

    /// Decompress one inbound frame, returning whatever output it completes.
    ///
    /// Errors leave the stream undefined; the caller must drop the connection
    /// and fully resync.
    fn feed(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError>;

    /// Release decompression state.
    fn close(&mut self);
}

/// Build a fresh, uninitialized codec by name.
pub fn negotiate(name: &str) -> GatewayResult<Box<dyn CompressionCodec>> {
    match name {
        ZlibStream::NAME => Ok(Box::new(ZlibStream::new())),
        ZlibPayload::NAME => Ok(Box::new(ZlibPayload::new())),
        Passthrough::NAME => Ok(Box::new(Passthrough::new())),
        other => Err(GatewayError::InvalidState(format!(
            "unsupported compression codec '{other}' (supported: {})",
            SUPPORTED.join(", ")
        ))),
    }
}

const CHUNK: usize = 32 * 1024;

/// Run `input` through `inflater` until it is consumed and output is drained.
#[allow(clippy::cast_possible_truncation)]
fn inflate_all(
    inflater: &mut Decompress,
    input: &[u8],
    flush: FlushDecompress,
) -> Result<Vec<u8>, DecompressError> {
    let mut out = Vec::with_capacity(input.len().saturating_mul(4).max(CHUNK));
    let mut consumed = 0usize;

    loop {
        if out.len() == out.capacity() {
            out.reserve(CHUNK);
        }
        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let status = inflater.decompress_vec(&input[consumed..], &mut out, flush)?;
        let read = (inflater.total_in() - before_in) as usize;
        let written = inflater.total_out() - before_out;
        consumed += read;

        if status == Status::StreamEnd {
            break;
        }
        if consumed >= input.len() && out.len() < out.capacity() {
            break;
        }
        if read == 0 && written == 0 {
            break;
        }
    }

    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_known_codecs() {
        for name in SUPPORTED {
            let codec = negotiate(name).unwrap();
            assert_eq!(codec.name(), name);
        }
    }

    #[test]
    fn negotiate_unknown_codec_fails() {
        assert!(matches!(negotiate("brotli"), Err(GatewayError::InvalidState(_))));
    }

    #[test]
    fn only_stream_codec_sets_url_parameter() {
        assert_eq!(negotiate("zlib-stream").unwrap().stream_parameter(), Some("zlib-stream"));
        assert_eq!(negotiate("zlib-payload").unwrap().stream_parameter(), None);
        assert!(negotiate("zlib-payload").unwrap().payload_compression());
        assert!(!negotiate("zlib-stream").unwrap().payload_compression());
    }
}
