use guildsync_core::DecodeError;

use super::CompressionCodec;

/// No compression (`none`): frames are forwarded as-is.
#[derive(Default)]
pub struct Passthrough {
    initialized: bool,
}

impl Passthrough {
    /// Negotiation name.
    pub const NAME: &'static str = "none";

    /// Create an uninitialized codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompressionCodec for Passthrough {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn payload_compression(&self) -> bool {
        false
    }

    fn init(&mut self) {
        self.initialized = true;
    }

    fn feed(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if !self.initialized {
            return Err(DecodeError::NotInitialized { codec: Self::NAME });
        }
        Ok(frame.to_vec())
    }

    fn close(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_bytes() {
        let mut codec = Passthrough::new();
        assert!(codec.feed(b"x").is_err());
        codec.init();
        assert_eq!(codec.feed(b"{\"op\":11}").unwrap(), b"{\"op\":11}");
    }
}
