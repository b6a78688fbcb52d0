//! Payload generation strategies for the packet senders.

pub mod stats;

use std::sync::Arc;

use thiserror::Error;

use crate::platform::HostProbe;

pub use stats::{decode_stats, fill_stats, StatsSnapshot};

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("buffer of {size} bytes cannot hold a stats payload (needs {needed})")]
    BufferTooSmall { size: usize, needed: usize },

    #[error("failed to read {source_name} snapshot: {error}")]
    Source {
        source_name: &'static str,
        #[source]
        error: std::io::Error,
    },

    #[error("malformed stats payload: {0}")]
    Malformed(String),
}

/// Strategy used to fill a sender's buffer.
#[derive(Clone)]
pub enum PayloadGenerator {
    /// Recognizable filler for synthetic load.
    Dummy,
    /// Host telemetry snapshot (heartbeats).
    Stats(Arc<dyn HostProbe>),
}

impl PayloadGenerator {
    /// Fill `buf` and return the number of bytes to send.
    ///
    /// `Ok(0)` and `Err(_)` both mean "nothing to send" to the caller.
    pub fn fill(&self, buf: &mut [u8]) -> Result<usize, PayloadError> {
        match self {
            PayloadGenerator::Dummy => Ok(fill_dummy(buf)),
            PayloadGenerator::Stats(probe) => fill_stats(probe.as_ref(), buf),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PayloadGenerator::Dummy => "dummy",
            PayloadGenerator::Stats(_) => "stats",
        }
    }
}

impl std::fmt::Debug for PayloadGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Write the `B\0DDD...D\0` filler pattern over the whole buffer.
///
/// Buffers shorter than 4 bytes are left untouched and yield 0.
pub fn fill_dummy(buf: &mut [u8]) -> usize {
    let size = buf.len();
    if size < 4 {
        return 0;
    }
    buf[0] = b'B';
    buf[1] = 0;
    buf[2..size - 1].fill(b'D');
    buf[size - 1] = 0;
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_layout() {
        for size in [4usize, 5, 64, 1024, 65_000] {
            let mut buf = vec![0xAAu8; size];
            assert_eq!(fill_dummy(&mut buf), size);
            assert_eq!(buf[0], b'B');
            assert_eq!(buf[1], 0);
            assert!(buf[2..size - 1].iter().all(|&b| b == b'D'), "size {}", size);
            assert_eq!(buf[size - 1], 0);
        }
    }

    #[test]
    fn test_dummy_small_buffer_untouched() {
        for size in 0..4 {
            let mut buf = vec![0xAAu8; size];
            assert_eq!(fill_dummy(&mut buf), 0);
            assert!(buf.iter().all(|&b| b == 0xAA));
        }
    }

    #[test]
    fn test_generator_dispatch() {
        let mut buf = [0u8; 16];
        let n = PayloadGenerator::Dummy.fill(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(PayloadGenerator::Dummy.name(), "dummy");
        assert_eq!(format!("{:?}", PayloadGenerator::Dummy), "dummy");
    }
}
