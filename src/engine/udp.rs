//! Rate-controlled UDP sender.
//!
//! Sends the generated payload to one destination at a fixed inter-packet
//! delay during each active window.  Transmission is fire-and-forget: send
//! errors are logged at trace level and the next packet goes out on schedule.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::ops::ControlFlow;
use std::time::Duration;

use tracing::{info, trace, warn};

use super::{generate, Destination, LoadTarget, WorkerContext, WorkerError};

/// Socket, address and primed buffer for one UDP target.
pub struct UdpSender {
    socket: UdpSocket,
    addr: SocketAddr,
    buf: Vec<u8>,
    len: usize,
}

impl UdpSender {
    /// Open the socket, resolve the destination and prime the payload.
    pub fn setup(target: &LoadTarget) -> Result<Self, WorkerError> {
        let addr = resolve(&target.destination, target.port)?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(WorkerError::Socket)?;
        if addr.ip() == Ipv4Addr::BROADCAST {
            socket.set_broadcast(true).map_err(WorkerError::Socket)?;
        }

        let mut buf = vec![0u8; target.message_size];
        let len = generate(&target.payload, &mut buf);
        Ok(Self {
            socket,
            addr,
            buf,
            len,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transmit the current payload; nothing is sent for an empty payload.
    pub fn send_once(&self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        match self.socket.send_to(&self.buf[..self.len], self.addr) {
            Ok(sent) => Some(sent),
            Err(e) => {
                trace!(addr = %self.addr, error = %e, "send failed");
                None
            }
        }
    }

    pub fn regenerate(&mut self, target: &LoadTarget) {
        self.len = generate(&target.payload, &mut self.buf);
    }
}

/// Worker body for one UDP load target.
pub fn run(id: usize, target: LoadTarget, ctx: WorkerContext) -> Result<(), WorkerError> {
    let mut sender = ctx.init.run(|| UdpSender::setup(&target)).map_err(|e| {
        warn!(worker = id, destination = %target.destination, error = %e, "udp sender setup failed");
        e
    })?;

    info!(
        worker = id,
        addr = %sender.addr(),
        payload = target.payload.name(),
        message_size = target.message_size,
        delay_us = target.delay_micros,
        schedule = %target.schedule,
        "udp sender started"
    );

    let delay = Duration::from_micros(target.delay_micros);
    let mut packets = 0u64;
    target.schedule.run(&ctx.shutdown, || {
        if ctx.send.send(|| sender.send_once()).is_some() {
            packets += 1;
        }
        if ctx.shutdown.sleep(delay) {
            return ControlFlow::Break(());
        }
        if target.regenerate_every_packet {
            sender.regenerate(&target);
        }
        ControlFlow::Continue(())
    });

    info!(worker = id, packets, "udp sender stopped");
    Ok(())
}

/// Resolve `destination` to an IPv4 socket address.
pub fn resolve(destination: &Destination, port: u16) -> Result<SocketAddr, WorkerError> {
    match destination {
        Destination::Broadcast => Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port))),
        Destination::Host(host) => (host.as_str(), port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.find(SocketAddr::is_ipv4))
            .ok_or_else(|| WorkerError::Resolve { host: host.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadGenerator;
    use crate::schedule::ScheduleSpec;
    use crate::shutdown::Shutdown;
    use std::thread;
    use std::time::Instant;

    fn target_to(port: u16, message_size: usize, delay_micros: u64) -> LoadTarget {
        LoadTarget {
            destination: Destination::Host("127.0.0.1".into()),
            port,
            message_size,
            delay_micros,
            payload: PayloadGenerator::Dummy,
            regenerate_every_packet: false,
            schedule: ScheduleSpec::CONTINUOUS,
        }
    }

    #[test]
    fn test_resolve_broadcast() {
        let addr = resolve(&Destination::Broadcast, 60888).unwrap();
        assert_eq!(addr, "255.255.255.255:60888".parse().unwrap());
    }

    #[test]
    fn test_resolve_literal_and_failure() {
        let addr = resolve(&Destination::Host("127.0.0.1".into()), 9).unwrap();
        assert_eq!(addr, "127.0.0.1:9".parse().unwrap());
        assert!(matches!(
            resolve(&Destination::Host("no such host.invalid".into()), 9),
            Err(WorkerError::Resolve { .. })
        ));
    }

    #[test]
    fn test_broadcast_socket_setup() {
        let mut target = target_to(50888, 64, 1000);
        target.destination = Destination::Broadcast;
        let sender = UdpSender::setup(&target).expect("setup");
        assert!(sender.socket.broadcast().unwrap());
    }

    #[test]
    fn test_empty_payload_is_not_sent() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = target_to(sink.local_addr().unwrap().port(), 2, 1000);
        let sender = UdpSender::setup(&target).unwrap();
        assert_eq!(sender.send_once(), None);
    }

    #[test]
    fn test_sender_emits_paced_packets() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        sink.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = sink.local_addr().unwrap().port();

        let ctx = WorkerContext::new(true, Shutdown::new());
        let shutdown = ctx.shutdown.clone();
        let worker = thread::spawn(move || run(0, target_to(port, 1024, 200_000), ctx));

        let mut buf = [0u8; 2048];
        let start = Instant::now();
        for _ in 0..3 {
            let (len, _) = sink.recv_from(&mut buf).expect("packet");
            assert_eq!(len, 1024);
            assert_eq!(buf[0], b'B');
        }
        // Three packets at 200ms spacing take at least two gaps.
        assert!(start.elapsed() >= Duration::from_millis(350));

        shutdown.cancel();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_unresolvable_target_ends_worker() {
        let ctx = WorkerContext::new(true, Shutdown::new());
        let mut target = target_to(9, 64, 1000);
        target.destination = Destination::Host("no such host.invalid".into());
        assert!(run(0, target, ctx).is_err());
    }
}
