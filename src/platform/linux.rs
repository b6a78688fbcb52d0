//! procfs / sysfs backed probe for Linux hosts.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::{HostProbe, Interface};

const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;

/// Reads `/proc/loadavg`, `/proc/net/dev` and `/sys/class/net`.
///
/// The roots are configurable so tests can point the probe at a fixture tree.
#[derive(Debug, Clone)]
pub struct ProcfsProbe {
    proc_root: PathBuf,
    sys_net_root: PathBuf,
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_net_root: PathBuf::from("/sys/class/net"),
        }
    }
}

impl ProcfsProbe {
    pub fn with_roots(proc_root: impl Into<PathBuf>, sys_net_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_net_root: sys_net_root.into(),
        }
    }

    fn read_proc(&self, rel: &str) -> io::Result<String> {
        let text = fs::read_to_string(self.proc_root.join(rel))?;
        if text.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} is empty", rel),
            ));
        }
        Ok(text)
    }
}

impl HostProbe for ProcfsProbe {
    fn cpu_snapshot(&self) -> io::Result<String> {
        self.read_proc("loadavg")
    }

    fn net_snapshot(&self) -> io::Result<String> {
        self.read_proc("net/dev")
    }

    fn outbound_interface(&self) -> Option<Interface> {
        let entries = fs::read_dir(&self.sys_net_root).ok()?;

        let mut candidates = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            let flags = fs::read_to_string(path.join("flags"))
                .ok()
                .and_then(|s| u32::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok());
            let index = fs::read_to_string(path.join("ifindex"))
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());

            match (flags, index) {
                (Some(flags), Some(index)) if flags & IFF_UP != 0 && flags & IFF_LOOPBACK == 0 => {
                    candidates.push(Interface { name, index });
                }
                _ => debug!(iface = %name, ?flags, "interface skipped"),
            }
        }

        // Directory order is unspecified; lowest index wins.
        candidates.into_iter().min_by_key(|iface| iface.index)
    }
}
