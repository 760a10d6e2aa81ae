//! Per-connection rate limiting
//!
//! Fixed-window counters over control messages and audio bytes. Owned by
//! the session task, so no locking.

use std::time::Instant;

use thiserror::Error;

use voice_relay_config::RateLimitConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("message rate limit exceeded ({0} per window)")]
    Messages(u32),

    #[error("audio byte rate limit exceeded ({0} bytes per window)")]
    AudioBytes(usize),
}

pub struct RateLimiter {
    config: RateLimitConfig,
    window_start: Instant,
    messages: u32,
    audio_bytes: usize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window_start: Instant::now(),
            messages: 0,
            audio_bytes: 0,
        }
    }

    /// Account one control message.
    pub fn check_message(&mut self) -> Result<(), RateLimitError> {
        self.roll_window();
        if self.messages >= self.config.messages_per_window {
            return Err(RateLimitError::Messages(self.config.messages_per_window));
        }
        self.messages += 1;
        Ok(())
    }

    /// Account one audio frame's bytes.
    pub fn check_audio(&mut self, bytes: usize) -> Result<(), RateLimitError> {
        self.roll_window();
        if self.audio_bytes + bytes > self.config.audio_bytes_per_window {
            return Err(RateLimitError::AudioBytes(
                self.config.audio_bytes_per_window,
            ));
        }
        self.audio_bytes += bytes;
        Ok(())
    }

    fn roll_window(&mut self) {
        if self.window_start.elapsed().as_secs() >= self.config.window_secs {
            self.window_start = Instant::now();
            self.messages = 0;
            self.audio_bytes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(messages: u32, audio_bytes: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            messages_per_window: messages,
            audio_bytes_per_window: audio_bytes,
            window_secs: 10,
        })
    }

    #[test]
    fn test_message_limit() {
        let mut limiter = limiter(2, 1024);
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_ok());
        assert_eq!(limiter.check_message(), Err(RateLimitError::Messages(2)));
    }

    #[test]
    fn test_audio_byte_limit() {
        let mut limiter = limiter(10, 100);
        assert!(limiter.check_audio(60).is_ok());
        assert!(limiter.check_audio(40).is_ok());
        assert_eq!(limiter.check_audio(1), Err(RateLimitError::AudioBytes(100)));
    }

    #[test]
    fn test_limits_are_independent() {
        let mut limiter = limiter(1, 100);
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_err());
        // Audio budget unaffected by the exhausted message budget.
        assert!(limiter.check_audio(50).is_ok());
    }
}
