//! Audio frame types
//!
//! The relay treats audio as opaque encoded bytes; no codec is mandated.
//! Frames are transient and are not persisted beyond the STT buffer window.

use std::time::Instant;

use crate::error::{Error, Result};

/// A timestamped chunk of raw encoded audio.
#[derive(Clone)]
pub struct AudioFrame {
    /// Opaque encoded audio bytes.
    pub payload: Vec<u8>,
    /// Frame sequence number for ordering within a session.
    pub sequence: u64,
    /// Arrival time at the server.
    pub received_at: Instant,
}

impl AudioFrame {
    pub fn new(payload: Vec<u8>, sequence: u64) -> Self {
        Self {
            payload,
            sequence,
            received_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("len", &self.payload.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Configured size bounds for inbound audio frames.
///
/// Frames outside the range are rejected, not truncated.
#[derive(Debug, Clone, Copy)]
pub struct FrameBounds {
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl Default for FrameBounds {
    fn default() -> Self {
        Self {
            min_bytes: 1,
            max_bytes: 64 * 1024,
        }
    }
}

impl FrameBounds {
    /// Validate a frame length against the bounds.
    pub fn check(&self, len: usize) -> Result<()> {
        if len < self.min_bytes {
            return Err(Error::InvalidInput(format!(
                "audio frame too small: {} bytes (minimum {})",
                len, self.min_bytes
            )));
        }
        if len > self.max_bytes {
            return Err(Error::InvalidInput(format!(
                "audio frame too large: {} bytes (maximum {})",
                len, self.max_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bounds() {
        let bounds = FrameBounds {
            min_bytes: 2,
            max_bytes: 8,
        };
        assert!(bounds.check(0).is_err());
        assert!(bounds.check(1).is_err());
        assert!(bounds.check(2).is_ok());
        assert!(bounds.check(8).is_ok());
        assert!(bounds.check(9).is_err());
    }

    #[test]
    fn test_rejection_is_invalid_input() {
        let bounds = FrameBounds::default();
        let err = bounds.check(0).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
