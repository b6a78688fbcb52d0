//! Probe for platforms without procfs.

use std::io;

use sysinfo::System;

use super::{HostProbe, Interface, NOT_IMPLEMENTED};

/// Load averages come from `sysinfo`; interface counters and link-layer
/// interface selection are not available.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoProbe;

impl HostProbe for SysinfoProbe {
    fn cpu_snapshot(&self) -> io::Result<String> {
        let load = System::load_average();
        Ok(format!("{:.2} {:.2} {:.2} ", load.one, load.five, load.fifteen))
    }

    fn net_snapshot(&self) -> io::Result<String> {
        Ok(NOT_IMPLEMENTED.to_string())
    }

    fn outbound_interface(&self) -> Option<Interface> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::parse_loadavg;

    #[test]
    fn test_cpu_snapshot_is_loadavg_text() {
        let text = SysinfoProbe.cpu_snapshot().unwrap();
        assert!(parse_loadavg(&text).is_some());
        assert_eq!(SysinfoProbe.net_snapshot().unwrap(), NOT_IMPLEMENTED);
        assert!(SysinfoProbe.outbound_interface().is_none());
    }
}
