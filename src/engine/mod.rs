//! Load workers and the resources they share.
//!
//! Every worker is a long-lived OS thread driven by its
//! [`ScheduleSpec`](crate::schedule::ScheduleSpec).  Workers share three
//! things, all handed over in a [`WorkerContext`]:
//!
//! - an [`InitGate`] that serializes one-time setup (seeding, resolution,
//!   buffer priming);
//! - a [`SendGate`] that optionally serializes every packet transmission;
//! - the process-wide [`Shutdown`] signal.

pub mod cpu;
pub mod heartbeat;
#[cfg(target_os = "linux")]
pub mod raw;
pub mod udp;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::payload::PayloadGenerator;
use crate::schedule::ScheduleSpec;
use crate::shutdown::Shutdown;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Setup failures that end a single worker.  Siblings keep running.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("cannot resolve destination {host}")]
    Resolve { host: String },

    #[error("no suitable (up, non-loopback) interface found")]
    NoInterface,
}

// ---------------------------------------------------------------------------
// Shared gates
// ---------------------------------------------------------------------------

/// Serializes one-time worker setup.
#[derive(Debug, Default)]
pub struct InitGate {
    lock: Mutex<()>,
}

impl InitGate {
    pub fn run<T>(&self, setup: impl FnOnce() -> T) -> T {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        setup()
    }
}

/// Critical section around packet transmission.
///
/// When `serialized` is off every sender transmits independently; the gate
/// then only forwards the call.
#[derive(Debug)]
pub struct SendGate {
    lock: Option<Mutex<()>>,
}

impl SendGate {
    pub fn new(serialized: bool) -> Self {
        Self {
            lock: serialized.then(|| Mutex::new(())),
        }
    }

    pub fn is_serialized(&self) -> bool {
        self.lock.is_some()
    }

    pub fn send<T>(&self, transmit: impl FnOnce() -> T) -> T {
        match &self.lock {
            Some(lock) => {
                let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
                transmit()
            }
            None => transmit(),
        }
    }
}

/// Everything a worker borrows from the process.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub init: Arc<InitGate>,
    pub send: Arc<SendGate>,
    pub shutdown: Shutdown,
}

impl WorkerContext {
    pub fn new(serialize_sends: bool, shutdown: Shutdown) -> Self {
        Self {
            init: Arc::new(InitGate::default()),
            send: Arc::new(SendGate::new(serialize_sends)),
            shutdown,
        }
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Where a UDP sender aims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Limited broadcast, 255.255.255.255.
    Broadcast,
    Host(String),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Broadcast => f.write_str("broadcast"),
            Destination::Host(host) => f.write_str(host),
        }
    }
}

/// One UDP load source (pinger or heartbeat).
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub destination: Destination,
    pub port: u16,
    pub message_size: usize,
    pub delay_micros: u64,
    pub payload: PayloadGenerator,
    pub regenerate_every_packet: bool,
    pub schedule: ScheduleSpec,
}

/// One link-layer load source.
#[derive(Debug, Clone)]
pub struct RawFrameTarget {
    pub source_mac: [u8; 6],
    pub target_mac: [u8; 6],
    pub message_size: usize,
    pub delay_micros: u64,
    pub payload: PayloadGenerator,
    pub regenerate_every_packet: bool,
    pub schedule: ScheduleSpec,
}

/// Fill `buf` through `payload`, mapping every failure to "nothing to send".
pub(crate) fn generate(payload: &PayloadGenerator, buf: &mut [u8]) -> usize {
    match payload.fill(buf) {
        Ok(len) => len,
        Err(e) => {
            tracing::debug!(generator = payload.name(), error = %e, "payload generation failed");
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_serialized_send_gate_excludes_concurrent_transmits() {
        let gate = Arc::new(SendGate::new(true));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        gate.send(|| {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_micros(200));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unserialized_send_gate_passes_through() {
        let gate = SendGate::new(false);
        assert!(!gate.is_serialized());
        assert_eq!(gate.send(|| 7), 7);
    }

    #[test]
    fn test_init_gate_returns_setup_value() {
        let gate = InitGate::default();
        assert_eq!(gate.run(|| "ready"), "ready");
    }

    #[test]
    fn test_generate_maps_errors_to_zero() {
        let mut tiny = [0u8; 2];
        assert_eq!(generate(&PayloadGenerator::Dummy, &mut tiny), 0);
        let mut buf = [0u8; 8];
        assert_eq!(generate(&PayloadGenerator::Dummy, &mut buf), 8);
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::Broadcast.to_string(), "broadcast");
        assert_eq!(Destination::Host("10.0.0.2".into()).to_string(), "10.0.0.2");
    }
}
