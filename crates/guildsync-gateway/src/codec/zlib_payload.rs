//! Per-payload zlib: each compressed binary frame is a complete zlib document.

use flate2::{Decompress, FlushDecompress};
use guildsync_core::DecodeError;

use super::{CompressionCodec, inflate_all};

const ZLIB_HEADER: u8 = 0x78;

/// Per-payload zlib codec (`zlib-payload`).
///
/// Frames that do not start with a zlib header pass through untouched; the
/// remote only compresses payloads above its own size threshold.
#[derive(Default)]
pub struct ZlibPayload {
    initialized: bool,
}

impl ZlibPayload {
    /// Negotiation name.
    pub const NAME: &'static str = "zlib-payload";

    /// Create an uninitialized codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompressionCodec for ZlibPayload {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload_compression(&self) -> bool {
        true
    }

    fn init(&mut self) {
        self.initialized = true;
    }

    fn feed(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if !self.initialized {
            return Err(DecodeError::NotInitialized { codec: Self::NAME });
        }
        if frame.first() != Some(&ZLIB_HEADER) {
            return Ok(frame.to_vec());
        }

        let mut inflater = Decompress::new(true);
        let out = inflate_all(&mut inflater, frame, FlushDecompress::Finish).map_err(|e| {
            DecodeError::Corrupted {
                codec: Self::NAME,
                message: e.to_string(),
            }
        })?;
        if out.is_empty() {
            return Err(DecodeError::Truncated {
                codec: Self::NAME,
                len: frame.len(),
            });
        }
        Ok(out)
    }

    fn close(&mut self) {
        self.initialized = false;
    }
}
