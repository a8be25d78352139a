//! Frame acquisition sources.
//!
//! This module provides the stream contract the session controller runs
//! against and the concrete sources behind it:
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//! - Local capture devices (`device:N`, same feature)
//! - Synthetic stub streams (`stub://`, always available; tests and demos)
//!
//! The acquisition layer is responsible for:
//! - Opening and releasing the underlying stream
//! - Yielding frames on demand, one `read` per call
//! - Reporting failures as typed values instead of swallowing them
//!
//! A single `read` does not retry; bounded retry is the caller's decision
//! and lives in `read_with_retry`.

mod rtsp;

pub use rtsp::{RtspConfig, RtspOpener, RtspSource, SourceDescriptor};

use std::fmt;

use crate::frame::Frame;

/// Stream failure classes. Both are recovered locally by the controller and
/// never fatal to the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// The stream could not be opened: bad credentials, unreachable host,
    /// missing device.
    Unavailable(String),
    /// A single frame read yielded no data: end-of-stream, decode error,
    /// network stall.
    Read(String),
}

impl StreamError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StreamError::Unavailable(reason.into())
    }

    pub fn read(reason: impl Into<String>) -> Self {
        StreamError::Read(reason.into())
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Unavailable(reason) => write!(f, "stream unavailable: {}", reason),
            StreamError::Read(reason) => write!(f, "frame read failed: {}", reason),
        }
    }
}

impl std::error::Error for StreamError {}

/// An open video stream yielding frames on demand.
pub trait FrameSource {
    /// Return the next available frame. Does not retry.
    fn read(&mut self) -> Result<Frame, StreamError>;

    /// Release all resources. Idempotent, and safe to call at any point;
    /// invoked on every session exit path.
    fn close(&mut self);
}

/// Factory for streams. The controller opens a fresh source per session and
/// never reuses a handle across sessions.
pub trait StreamOpener {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, StreamError>;
}

/// Bounded read retry: up to `attempts` single reads, returning the first
/// frame or the last failure.
pub fn read_with_retry(
    source: &mut dyn FrameSource,
    attempts: u32,
) -> Result<Frame, StreamError> {
    let mut last = StreamError::read("no read attempts configured");
    for attempt in 1..=attempts {
        match source.read() {
            Ok(frame) => return Ok(frame),
            Err(err) => {
                log::debug!(
                    "frame read attempt {}/{} failed: {}",
                    attempt,
                    attempts,
                    err
                );
                last = err;
            }
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails the first `failures` reads, then succeeds.
    struct FlakySource {
        failures: u32,
        reads: u32,
    }

    impl FrameSource for FlakySource {
        fn read(&mut self) -> Result<Frame, StreamError> {
            self.reads += 1;
            if self.reads <= self.failures {
                Err(StreamError::read("transient stall"))
            } else {
                Ok(Frame::filled(4, 4, 0))
            }
        }

        fn close(&mut self) {}
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let mut source = FlakySource {
            failures: 3,
            reads: 0,
        };

        let frame = read_with_retry(&mut source, 5).expect("frame");
        assert_eq!(frame.width, 4);
        assert_eq!(source.reads, 4);
    }

    #[test]
    fn retry_gives_up_after_attempt_budget() {
        let mut source = FlakySource {
            failures: u32::MAX,
            reads: 0,
        };

        let err = read_with_retry(&mut source, 5).expect_err("exhausted");
        assert!(matches!(err, StreamError::Read(_)));
        assert_eq!(source.reads, 5);
    }

    #[test]
    fn retry_with_zero_attempts_never_reads() {
        let mut source = FlakySource {
            failures: 0,
            reads: 0,
        };

        assert!(read_with_retry(&mut source, 0).is_err());
        assert_eq!(source.reads, 0);
    }
}
