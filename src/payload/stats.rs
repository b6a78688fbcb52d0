//! Host statistics payload.
//!
//! Wire format, repeated for the tags `C` (load average), `N` (interface
//! counters) and `S` (OS name), in that order:
//!
//! ```text
//! +-----+------+----------------+------+
//! | tag | 0x00 | text (n bytes) | 0x00 |
//! +-----+------+----------------+------+
//! ```
//!
//! Segment lengths vary per host, so readers must scan for the terminators
//! instead of assuming offsets.

use super::PayloadError;
use crate::platform::HostProbe;

pub const TAG_CPU: u8 = b'C';
pub const TAG_NET: u8 = b'N';
pub const TAG_OS: u8 = b'S';

/// Framing bytes per segment: tag, separator, terminator.
pub const SEGMENT_OVERHEAD: usize = 3;

/// Decoded heartbeat contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cpu: String,
    pub net: String,
    pub os: String,
}

/// Fill `buf` with a `C`/`N`/`S` snapshot read from `probe`.
///
/// Segment texts are truncated so all three segments fit; the OS name is
/// never truncated.  Returns the number of bytes written.
pub fn fill_stats(probe: &dyn HostProbe, buf: &mut [u8]) -> Result<usize, PayloadError> {
    let os = probe.os_name().as_bytes();
    let needed = 3 * SEGMENT_OVERHEAD + os.len();
    if buf.len() < needed {
        return Err(PayloadError::BufferTooSmall {
            size: buf.len(),
            needed,
        });
    }

    let cpu = probe.cpu_snapshot().map_err(|error| PayloadError::Source {
        source_name: "cpu",
        error,
    })?;
    let net = probe.net_snapshot().map_err(|error| PayloadError::Source {
        source_name: "network",
        error,
    })?;

    let mut room = buf.len() - needed;
    let cpu = clip(cpu.as_bytes(), &mut room);
    let net = clip(net.as_bytes(), &mut room);

    let mut pos = put_segment(buf, 0, TAG_CPU, cpu);
    pos = put_segment(buf, pos, TAG_NET, net);
    pos = put_segment(buf, pos, TAG_OS, os);
    Ok(pos)
}

/// Parse a stats payload produced by [`fill_stats`].
pub fn decode_stats(bytes: &[u8]) -> Result<StatsSnapshot, PayloadError> {
    let mut rest = bytes;
    let mut texts = Vec::with_capacity(3);

    for tag in [TAG_CPU, TAG_NET, TAG_OS] {
        match rest {
            [t, 0, tail @ ..] if *t == tag => {
                let end = tail.iter().position(|&b| b == 0).ok_or_else(|| {
                    PayloadError::Malformed(format!("segment '{}' is not terminated", tag as char))
                })?;
                texts.push(String::from_utf8_lossy(&tail[..end]).into_owned());
                rest = &tail[end + 1..];
            }
            _ => {
                return Err(PayloadError::Malformed(format!(
                    "expected segment '{}'",
                    tag as char
                )))
            }
        }
    }

    if !rest.is_empty() {
        return Err(PayloadError::Malformed(format!(
            "{} trailing bytes",
            rest.len()
        )));
    }

    let os = texts.pop().unwrap_or_default();
    let net = texts.pop().unwrap_or_default();
    let cpu = texts.pop().unwrap_or_default();
    Ok(StatsSnapshot { cpu, net, os })
}

fn clip<'a>(text: &'a [u8], room: &mut usize) -> &'a [u8] {
    // An embedded NUL would end the segment early on the reader side.
    let text = match text.iter().position(|&b| b == 0) {
        Some(nul) => &text[..nul],
        None => text,
    };
    let len = text.len().min(*room);
    *room -= len;
    &text[..len]
}

fn put_segment(buf: &mut [u8], pos: usize, tag: u8, text: &[u8]) -> usize {
    buf[pos] = tag;
    buf[pos + 1] = 0;
    let start = pos + 2;
    buf[start..start + text.len()].copy_from_slice(text);
    buf[start + text.len()] = 0;
    start + text.len() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Interface, NOT_IMPLEMENTED};
    use std::io;

    struct FixedProbe {
        cpu: &'static str,
        net: &'static str,
    }

    impl HostProbe for FixedProbe {
        fn cpu_snapshot(&self) -> io::Result<String> {
            Ok(self.cpu.to_string())
        }
        fn net_snapshot(&self) -> io::Result<String> {
            Ok(self.net.to_string())
        }
        fn os_name(&self) -> &'static str {
            "Linux"
        }
        fn outbound_interface(&self) -> Option<Interface> {
            None
        }
    }

    struct BrokenProbe;

    impl HostProbe for BrokenProbe {
        fn cpu_snapshot(&self) -> io::Result<String> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no loadavg"))
        }
        fn net_snapshot(&self) -> io::Result<String> {
            Ok(NOT_IMPLEMENTED.into())
        }
        fn outbound_interface(&self) -> Option<Interface> {
            None
        }
    }

    #[test]
    fn test_segments_in_order() {
        let probe = FixedProbe {
            cpu: "0.10 0.20 0.30 1/100 42\n",
            net: NOT_IMPLEMENTED,
        };
        let mut buf = [0u8; 1024];
        let n = fill_stats(&probe, &mut buf).unwrap();

        let parts: Vec<&[u8]> = buf[..n].split(|&b| b == 0).collect();
        // Trailing terminator yields one empty tail.
        assert_eq!(parts.len(), 7);
        assert_eq!(parts[0], b"C");
        assert_eq!(parts[1], probe.cpu.as_bytes());
        assert_eq!(parts[2], b"N");
        assert_eq!(parts[3], NOT_IMPLEMENTED.as_bytes());
        assert_eq!(parts[4], b"S");
        assert_eq!(parts[5], b"Linux");
        assert!(parts[6].is_empty());

        assert_eq!(
            n,
            probe.cpu.len() + NOT_IMPLEMENTED.len() + "Linux".len() + 3 * SEGMENT_OVERHEAD
        );
    }

    #[test]
    fn test_decode_matches_fill() {
        let probe = FixedProbe {
            cpu: "1.00 1.00 1.00",
            net: "eth0: 1 2 3",
        };
        let mut buf = [0u8; 256];
        let n = fill_stats(&probe, &mut buf).unwrap();
        let snap = decode_stats(&buf[..n]).unwrap();
        assert_eq!(snap.cpu, "1.00 1.00 1.00");
        assert_eq!(snap.net, "eth0: 1 2 3");
        assert_eq!(snap.os, "Linux");
    }

    #[test]
    fn test_long_sources_are_truncated_to_fit() {
        let probe = FixedProbe {
            cpu: "0.50 0.50 0.50 1/1 1",
            net: "x".repeat(4096).leak(),
        };
        let mut buf = [0u8; 64];
        let n = fill_stats(&probe, &mut buf).unwrap();
        assert_eq!(n, 64);
        let snap = decode_stats(&buf[..n]).unwrap();
        assert_eq!(snap.cpu, probe.cpu);
        assert_eq!(snap.os, "Linux");
        assert_eq!(
            snap.net.len(),
            64 - 3 * SEGMENT_OVERHEAD - "Linux".len() - probe.cpu.len()
        );
    }

    #[test]
    fn test_buffer_too_small() {
        let probe = FixedProbe { cpu: "", net: "" };
        let mut buf = [0u8; 10];
        assert!(matches!(
            fill_stats(&probe, &mut buf),
            Err(PayloadError::BufferTooSmall { needed: 14, .. })
        ));
    }

    #[test]
    fn test_unreadable_source_is_an_error() {
        let mut buf = [0u8; 128];
        let err = fill_stats(&BrokenProbe, &mut buf).unwrap_err();
        assert!(matches!(err, PayloadError::Source { source_name: "cpu", .. }));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_stats(b"").is_err());
        assert!(decode_stats(b"N\0x\0C\0y\0S\0z\0").is_err());
        assert!(decode_stats(b"C\0x\0N\0y\0S\0z").is_err());
        assert!(decode_stats(b"C\0x\0N\0y\0S\0z\0junk").is_err());
    }
}
