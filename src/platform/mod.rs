//! Host data sources used by the stats payload and the raw frame sender.
//!
//! Each target platform supplies one [`HostProbe`] implementation.  Data a
//! platform cannot provide is reported as [`NOT_IMPLEMENTED`] so that the
//! heartbeat format stays well-formed everywhere.

use std::io;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(not(target_os = "linux"))]
pub mod fallback;

/// Placeholder text for data a platform cannot supply.
pub const NOT_IMPLEMENTED: &str = "NOT IMPLEMENTED";

/// A network interface selected for outbound link-layer traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
}

/// Capability interface over platform-specific host statistics.
pub trait HostProbe: Send + Sync {
    /// Load-average snapshot as text.
    fn cpu_snapshot(&self) -> io::Result<String>;

    /// Per-interface traffic counters as text.
    fn net_snapshot(&self) -> io::Result<String>;

    /// Host OS identifier.
    fn os_name(&self) -> &'static str {
        os_name()
    }

    /// First interface that is up and not loopback, if any.
    fn outbound_interface(&self) -> Option<Interface>;
}

/// The probe for the platform this binary was built for.
pub fn default_probe() -> Box<dyn HostProbe> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::ProcfsProbe::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(fallback::SysinfoProbe)
    }
}

/// OS identifier carried in the `S` segment of a heartbeat.
pub fn os_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "freebsd" => "FreeBSD",
        "solaris" | "illumos" => "Solaris",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_name_is_known_label() {
        let name = os_name();
        assert!(["Linux", "FreeBSD", "Solaris", "Unknown"].contains(&name));
        #[cfg(target_os = "linux")]
        assert_eq!(name, "Linux");
    }

    #[test]
    fn test_default_probe_reports_cpu() {
        let probe = default_probe();
        let cpu = probe.cpu_snapshot().expect("cpu snapshot");
        assert!(!cpu.is_empty());
    }
}
