//! Heartbeat reporter: a UDP sender wired to the stats payload.

use std::sync::Arc;

use super::{Destination, LoadTarget};
use crate::payload::PayloadGenerator;
use crate::platform::HostProbe;
use crate::schedule::ScheduleSpec;

/// Buffer size for one stats snapshot.
pub const STATS_SIZE: usize = 1024;

pub const MASTER_PORT_DEFAULT: u16 = 60888;

pub const HEARTBEAT_DELAY_DEFAULT_MICROS: u64 = 10 * crate::rate::MICROS_PER_SEC;

/// Build the heartbeat target.
///
/// `master = None` broadcasts.  Heartbeats never pause and carry a fresh
/// snapshot in every packet.
pub fn target(
    master: Option<&str>,
    port: u16,
    interval_micros: u64,
    probe: Arc<dyn HostProbe>,
) -> LoadTarget {
    LoadTarget {
        destination: master.map_or(Destination::Broadcast, |host| Destination::Host(host.to_string())),
        port,
        message_size: STATS_SIZE,
        delay_micros: interval_micros,
        payload: PayloadGenerator::Stats(probe),
        regenerate_every_packet: true,
        schedule: ScheduleSpec::CONTINUOUS,
    }
}
