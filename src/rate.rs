//! Throughput to packet-parameter derivation.
//!
//! A target rate is reached with one fixed, transport-maximal packet size and
//! a computed inter-packet gap rather than by varying the packet count.
//!
//! The ceiling assumes a 1 Gbit link: maximum-size UDP datagrams (65,000
//! bytes) every 525 us give `1_000_000 / 525 * 65_000 = 123_760_000` B/s.

use std::time::Duration;

/// Highest sustainable throughput, in bytes per second.
pub const MAX_BYTES_PER_SEC: u64 = 123_760_000;

pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Largest UDP payload emitted by the pingers.
pub const UDP_MSG_SIZE_MAX: usize = 65_000;

/// Ethernet payload length (`ETH_DATA_LEN`).
pub const ETH_DATA_LEN: usize = 1_500;

/// Largest raw-frame payload, leaving headroom under the MTU.
pub const RAW_MSG_SIZE_MAX: usize = ETH_DATA_LEN - 100;

pub const DEFAULT_MSG_SIZE: usize = 1_024;

pub const DEFAULT_DELAY_MICROS: u64 = MICROS_PER_SEC;

/// Which sender the packets are shaped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    RawFrame,
}

impl Transport {
    /// Maximum payload carried by one packet on this transport.
    pub fn max_payload(self) -> usize {
        match self {
            Transport::Udp => UDP_MSG_SIZE_MAX,
            Transport::RawFrame => RAW_MSG_SIZE_MAX,
        }
    }
}

/// Effective packet size and spacing for a load sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketPlan {
    pub message_size: usize,
    pub delay_micros: u64,
}

impl Default for PacketPlan {
    fn default() -> Self {
        Self {
            message_size: DEFAULT_MSG_SIZE,
            delay_micros: DEFAULT_DELAY_MICROS,
        }
    }
}

impl PacketPlan {
    /// Build a plan from explicitly configured values, replacing out-of-range
    /// ones with the defaults.
    pub fn explicit(message_size: usize, delay_micros: u64) -> Self {
        let message_size = if message_size == 0 || message_size > UDP_MSG_SIZE_MAX {
            DEFAULT_MSG_SIZE
        } else {
            message_size
        };
        let delay_micros = if delay_micros == 0 {
            DEFAULT_DELAY_MICROS
        } else {
            delay_micros
        };
        Self {
            message_size,
            delay_micros,
        }
    }

    /// Derive the plan for `target_rate` bytes/second.
    ///
    /// A rate of `0` means "unset" and returns `fallback` untouched.  Rates
    /// above [`MAX_BYTES_PER_SEC`] are clamped to it.
    pub fn derive(target_rate: u64, transport: Transport, fallback: PacketPlan) -> Self {
        if target_rate == 0 {
            return fallback;
        }
        let rate = target_rate.min(MAX_BYTES_PER_SEC);
        let message_size = transport.max_payload();
        let delay = MICROS_PER_SEC as f64 / rate as f64 * message_size as f64;
        Self {
            message_size,
            delay_micros: delay.round() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_micros(self.delay_micros)
    }
}
