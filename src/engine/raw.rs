//! Raw Ethernet frame sender (Linux, requires root).
//!
//! Frames carry the non-standard ethertype `0x8200` so the synthetic traffic
//! is distinguishable from real IP traffic on the wire.

use std::io;
use std::mem;
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace, warn};

use super::{generate, RawFrameTarget, WorkerContext, WorkerError};
use crate::platform::{HostProbe, Interface};

pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;
pub const ETHERTYPE_SYNTHETIC: u16 = 0x8200;

/// Fictive source MAC (D-Link OUI).
pub const SOURCE_MAC: [u8; ETH_ALEN] = [0x00, 0x17, 0x9A, 0x22, 0x22, 0x22];
/// Fictive target MAC (D-Link OUI).
pub const TARGET_MAC: [u8; ETH_ALEN] = [0x00, 0x17, 0x9A, 0x11, 0x11, 0x11];

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ethernet frame with a fixed header and a rewritable payload.
pub struct Frame {
    bytes: Vec<u8>,
    payload_len: usize,
}

impl Frame {
    pub fn new(target_mac: [u8; ETH_ALEN], source_mac: [u8; ETH_ALEN], payload_size: usize) -> Self {
        let mut bytes = vec![0u8; ETH_HLEN + payload_size];
        bytes[..ETH_ALEN].copy_from_slice(&target_mac);
        bytes[ETH_ALEN..2 * ETH_ALEN].copy_from_slice(&source_mac);
        bytes[2 * ETH_ALEN..ETH_HLEN].copy_from_slice(&ETHERTYPE_SYNTHETIC.to_be_bytes());
        Self {
            bytes,
            payload_len: 0,
        }
    }

    /// Regenerate the payload area through `target.payload`.
    pub fn fill(&mut self, target: &RawFrameTarget) {
        self.payload_len = generate(&target.payload, &mut self.bytes[ETH_HLEN..]);
    }

    /// Header plus the generated payload; empty when there is nothing to send.
    pub fn wire_bytes(&self) -> &[u8] {
        if self.payload_len == 0 {
            return &[];
        }
        &self.bytes[..ETH_HLEN + self.payload_len]
    }
}

// ---------------------------------------------------------------------------
// PacketSocket
// ---------------------------------------------------------------------------

/// `AF_PACKET` socket bound to one interface and destination MAC.
pub struct PacketSocket {
    fd: OwnedFd,
    addr: libc::sockaddr_ll,
}

impl PacketSocket {
    pub fn open(iface: &Interface, target_mac: [u8; ETH_ALEN]) -> io::Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be() as libc::c_int;
        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = (libc::ETH_P_IP as u16).to_be();
        addr.sll_ifindex = iface.index as libc::c_int;
        addr.sll_hatype = libc::ARPHRD_ETHER;
        addr.sll_pkttype = libc::PACKET_OTHERHOST as libc::c_uchar;
        addr.sll_halen = ETH_ALEN as libc::c_uchar;
        addr.sll_addr[..ETH_ALEN].copy_from_slice(&target_mac);

        Ok(Self { fd, addr })
    }

    pub fn send(&self, frame: &[u8]) -> io::Result<usize> {
        // SAFETY: the buffer and address outlive the call and their lengths
        // are passed alongside.
        let rc = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &self.addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn setup(target: &RawFrameTarget, probe: &dyn HostProbe) -> Result<(PacketSocket, Frame, Interface), WorkerError> {
    let iface = probe.outbound_interface().ok_or(WorkerError::NoInterface)?;
    let socket = PacketSocket::open(&iface, target.target_mac).map_err(WorkerError::Socket)?;
    let mut frame = Frame::new(target.target_mac, target.source_mac, target.message_size);
    frame.fill(target);
    Ok((socket, frame, iface))
}

/// Worker body for the link-layer load target.
pub fn run(
    id: usize,
    target: RawFrameTarget,
    probe: Arc<dyn HostProbe>,
    ctx: WorkerContext,
) -> Result<(), WorkerError> {
    let (socket, mut frame, iface) = ctx.init.run(|| setup(&target, probe.as_ref())).map_err(|e| {
        warn!(worker = id, error = %e, "raw sender setup failed");
        e
    })?;

    info!(
        worker = id,
        iface = %iface.name,
        ifindex = iface.index,
        message_size = target.message_size,
        delay_us = target.delay_micros,
        schedule = %target.schedule,
        "raw frame sender started"
    );

    let delay = Duration::from_micros(target.delay_micros);
    let mut frames = 0u64;
    target.schedule.run(&ctx.shutdown, || {
        let wire = frame.wire_bytes();
        if !wire.is_empty() {
            match ctx.send.send(|| socket.send(wire)) {
                Ok(_) => frames += 1,
                Err(e) => trace!(error = %e, "frame send failed"),
            }
        }
        if ctx.shutdown.sleep(delay) {
            return ControlFlow::Break(());
        }
        if target.regenerate_every_packet {
            frame.fill(&target);
        }
        ControlFlow::Continue(())
    });

    info!(worker = id, frames, "raw frame sender stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadGenerator;
    use crate::schedule::ScheduleSpec;

    fn target(message_size: usize) -> RawFrameTarget {
        RawFrameTarget {
            source_mac: SOURCE_MAC,
            target_mac: TARGET_MAC,
            message_size,
            delay_micros: 1000,
            payload: PayloadGenerator::Dummy,
            regenerate_every_packet: false,
            schedule: ScheduleSpec::CONTINUOUS,
        }
    }

    #[test]
    fn test_frame_header_layout() {
        let t = target(64);
        let mut frame = Frame::new(t.target_mac, t.source_mac, t.message_size);
        frame.fill(&t);
        let wire = frame.wire_bytes();

        assert_eq!(wire.len(), ETH_HLEN + 64);
        assert_eq!(&wire[0..6], &TARGET_MAC);
        assert_eq!(&wire[6..12], &SOURCE_MAC);
        assert_eq!(&wire[12..14], &[0x82, 0x00]);
        assert_eq!(wire[ETH_HLEN], b'B');
        assert_eq!(wire[wire.len() - 1], 0);
    }

    #[test]
    fn test_empty_payload_yields_no_frame() {
        let t = target(3);
        let mut frame = Frame::new(t.target_mac, t.source_mac, t.message_size);
        frame.fill(&t);
        assert!(frame.wire_bytes().is_empty());
    }
}
