//! Raw per-core CPU tick counters.
//!
//! The OS hands out cumulative ticks per core, split by run state. We fold
//! each core down to a (busy, total) pair right away since that is all the
//! utilisation maths needs.
//!
//! - macOS: `host_processor_info(PROCESSOR_CPU_LOAD_INFO)`, packages from `hw.packages`
//! - Linux: per-core `cpuN` lines of `/proc/stat`, packages from sysfs topology

use std::collections::{HashMap, HashSet};

use crate::error::PanelError;

/// Busy and total ticks for every core at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSnapshot {
    busy: Vec<u64>,
    total: Vec<u64>,
}

impl TickSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cores: usize) -> Self {
        Self {
            busy: Vec::with_capacity(cores),
            total: Vec::with_capacity(cores),
        }
    }

    /// Build from already-aggregated counters. Busy is capped at total.
    pub fn from_parts(busy: Vec<u64>, total: Vec<u64>) -> Self {
        let mut snapshot = Self::with_capacity(total.len());
        for (b, t) in busy.into_iter().zip(total) {
            snapshot.busy.push(b.min(t));
            snapshot.total.push(t);
        }
        snapshot
    }

    /// Append one core given its ticks in every state and how many of those were idle
    pub fn push_core(&mut self, ticks_by_state: &[u64], idle_ticks: u64) {
        let total: u64 = ticks_by_state.iter().sum();
        self.total.push(total);
        self.busy.push(total.saturating_sub(idle_ticks));
    }

    pub fn num_cores(&self) -> usize {
        self.total.len()
    }

    pub fn busy(&self) -> &[u64] {
        &self.busy
    }

    pub fn total(&self) -> &[u64] {
        &self.total
    }
}

/// Where CPU tick counters come from
pub trait TickSource {
    /// Number of physical CPU packages (sockets). May be non-positive if the OS is confused.
    fn num_packages(&mut self) -> Result<i64, PanelError>;

    /// Current cumulative ticks for every core
    fn fetch(&mut self) -> Result<TickSnapshot, PanelError>;
}

/// Tick source backed by the running kernel
#[derive(Debug, Default)]
pub struct HostTicks;

impl HostTicks {
    pub fn new() -> Self {
        Self
    }
}

impl TickSource for HostTicks {
    fn num_packages(&mut self) -> Result<i64, PanelError> {
        platform::num_packages()
    }

    fn fetch(&mut self) -> Result<TickSnapshot, PanelError> {
        platform::fetch_ticks_by_core()
    }
}

/// `cpuN` -> N
fn cpu_index(label: &str) -> Option<usize> {
    label
        .strip_prefix("cpu")
        .filter(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|idx| idx.parse().ok())
}

/// Parse the per-core lines of `/proc/stat` in kernel order.
pub fn parse_proc_stat(text: &str) -> Result<TickSnapshot, PanelError> {
    parse_proc_stat_by_package(text, &HashMap::new())
}

/// Parse the per-core lines of `/proc/stat`, grouping cores by package.
///
/// Fields after the label are user, nice, system, idle, iowait, irq, softirq,
/// steal, guest, guest_nice. Guest time is already included in user/nice so
/// only the first eight count; idle and iowait together are the idle state.
///
/// Cores are ordered by (package id, cpu index) so each package's cores sit
/// next to each other even when the kernel interleaves sockets. Cores with no
/// known package go last.
pub fn parse_proc_stat_by_package(
    text: &str,
    packages: &HashMap<usize, i64>,
) -> Result<TickSnapshot, PanelError> {
    let mut cores = Vec::new();

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let label = match fields.next() {
            Some(l) => l,
            None => continue,
        };
        // Skip the aggregate "cpu" line and everything that isn't a cpu line
        let index = match cpu_index(label) {
            Some(i) => i,
            None => continue,
        };

        let ticks: Vec<u64> = fields
            .take(8)
            .map(|v| v.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|e| PanelError::NoData(format!("bad /proc/stat line {:?}: {}", label, e)))?;
        if ticks.len() < 4 {
            return Err(PanelError::NoData(format!(
                "/proc/stat line {:?} has only {} fields",
                label,
                ticks.len()
            )));
        }

        let package = packages.get(&index).copied().unwrap_or(i64::MAX);
        cores.push((package, index, ticks));
    }

    if cores.is_empty() {
        return Err(PanelError::NoData("no per-core lines in /proc/stat".into()));
    }

    cores.sort_by_key(|&(package, index, _)| (package, index));

    let mut snapshot = TickSnapshot::with_capacity(cores.len());
    for (_, _, ticks) in &cores {
        let idle = ticks[3] + ticks.get(4).copied().unwrap_or(0);
        snapshot.push_core(ticks, idle);
    }
    Ok(snapshot)
}

/// Count distinct package ids
pub fn count_packages<'a>(ids: impl IntoIterator<Item = &'a i64>) -> i64 {
    ids.into_iter().collect::<HashSet<_>>().len() as i64
}

#[cfg(target_os = "linux")]
mod platform {
    use std::collections::HashMap;
    use std::fs;

    use super::{count_packages, cpu_index, parse_proc_stat_by_package, TickSnapshot};
    use crate::error::PanelError;

    const PROC_STAT: &str = "/proc/stat";
    const SYS_CPU: &str = "/sys/devices/system/cpu";

    pub fn fetch_ticks_by_core() -> Result<TickSnapshot, PanelError> {
        let text = fs::read_to_string(PROC_STAT)
            .map_err(|e| PanelError::NoData(format!("reading {}: {}", PROC_STAT, e)))?;
        // Without topology the cores still come out, just in kernel order
        let packages = package_ids().unwrap_or_default();
        parse_proc_stat_by_package(&text, &packages)
    }

    pub fn num_packages() -> Result<i64, PanelError> {
        Ok(count_packages(package_ids()?.values()))
    }

    /// cpu index -> `physical_package_id` for every online CPU
    fn package_ids() -> Result<HashMap<usize, i64>, PanelError> {
        let entries = fs::read_dir(SYS_CPU)
            .map_err(|e| PanelError::NoData(format!("reading {}: {}", SYS_CPU, e)))?;

        let mut ids = HashMap::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let index = match cpu_index(&name.to_string_lossy()) {
                Some(i) => i,
                None => continue,
            };
            // Offline CPUs have no topology directory
            let id = fs::read_to_string(entry.path().join("topology/physical_package_id"))
                .ok()
                .and_then(|id| id.trim().parse::<i64>().ok());
            if let Some(id) = id {
                ids.insert(index, id);
            }
        }

        Ok(ids)
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::mem::size_of;
    use std::ptr;

    use libc::{c_char, c_int, c_void};

    use super::TickSnapshot;
    use crate::error::PanelError;

    pub fn fetch_ticks_by_core() -> Result<TickSnapshot, PanelError> {
        let mut num_cores: libc::natural_t = 0;
        let mut load_info: libc::processor_info_array_t = ptr::null_mut();
        let mut load_info_len: libc::mach_msg_type_number_t = 0;

        #[allow(deprecated)]
        let err = unsafe {
            libc::host_processor_info(
                libc::mach_host_self(),
                libc::PROCESSOR_CPU_LOAD_INFO,
                &mut num_cores,
                &mut load_info,
                &mut load_info_len,
            )
        };
        if err != libc::KERN_SUCCESS {
            return Err(PanelError::NoData(format!("host_processor_info returned {}", err)));
        }

        let loads = unsafe {
            std::slice::from_raw_parts(
                load_info as *const libc::processor_cpu_load_info,
                num_cores as usize,
            )
        };

        let mut snapshot = TickSnapshot::with_capacity(num_cores as usize);
        for load in loads {
            let ticks: Vec<u64> = load.cpu_ticks.iter().map(|&t| t as u64).collect();
            let idle = ticks[libc::CPU_STATE_IDLE as usize];
            snapshot.push_core(&ticks, idle);
        }

        // The kernel allocated the info array in our address space
        #[allow(deprecated)]
        unsafe {
            libc::vm_deallocate(
                libc::mach_task_self(),
                load_info as libc::vm_address_t,
                load_info_len as libc::vm_size_t * size_of::<libc::integer_t>() as libc::vm_size_t,
            );
        }

        Ok(snapshot)
    }

    pub fn num_packages() -> Result<i64, PanelError> {
        let mut packages: c_int = 0;
        let mut len = size_of::<c_int>();
        let name = b"hw.packages\0";

        let rc = unsafe {
            libc::sysctlbyname(
                name.as_ptr() as *const c_char,
                &mut packages as *mut c_int as *mut c_void,
                &mut len,
                ptr::null_mut(),
                0,
            )
        };
        if rc != 0 {
            return Err(PanelError::NoData(format!(
                "fetching hw.packages: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(packages as i64)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
    use super::TickSnapshot;
    use crate::error::PanelError;

    pub fn fetch_ticks_by_core() -> Result<TickSnapshot, PanelError> {
        Err(PanelError::NoData("per-core tick counters not supported on this OS".into()))
    }

    pub fn num_packages() -> Result<i64, PanelError> {
        Err(PanelError::NoData("package count not supported on this OS".into()))
    }
}
