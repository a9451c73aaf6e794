//! Measured process usage (resident memory, CPU time).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessUsage {
    pub rss_bytes: u64,
    pub cpu_time_ms: u64,
}

impl std::ops::Add for ProcessUsage {
    type Output = ProcessUsage;

    fn add(self, rhs: Self) -> Self::Output {
        ProcessUsage {
            rss_bytes: self.rss_bytes.saturating_add(rhs.rss_bytes),
            cpu_time_ms: self.cpu_time_ms.saturating_add(rhs.cpu_time_ms),
        }
    }
}

impl std::iter::Sum for ProcessUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ProcessUsage::default(), |acc, u| acc + u)
    }
}

/// Sample a live process. `None` if it has exited or the platform has no `/proc`.
#[cfg(target_os = "linux")]
pub fn sample(pid: u32) -> Option<ProcessUsage> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;

    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    let ticks = if ticks > 0 { ticks as u64 } else { 100 };

    Some(ProcessUsage {
        rss_bytes: parse_vm_rss(&status)?,
        cpu_time_ms: parse_cpu_ticks(&stat)?.saturating_mul(1000) / ticks,
    })
}

#[cfg(not(target_os = "linux"))]
pub fn sample(_pid: u32) -> Option<ProcessUsage> {
    None
}

/// `VmRSS:   1234 kB` -> bytes.
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// utime + stime (fields 14 and 15). The command name may contain spaces, so
/// fields are counted from the closing parenthesis.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest starts at field 3 (state)
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tpython3\nVmPeak:\t  9000 kB\nVmRSS:\t  2048 kB\n";
        assert_eq!(parse_vm_rss(status), Some(2048 * 1024));
        assert_eq!(parse_vm_rss("Name:\tzombie\n"), None);
    }

    #[test]
    fn test_parse_cpu_ticks_handles_spaces_in_name() {
        let stat = "4242 (my tool) S 1 4242 4242 0 -1 4194560 100 0 0 0 25 17 0 0 20 0 1 0 100 0 0";
        assert_eq!(parse_cpu_ticks(stat), Some(42));
    }

    #[test]
    fn test_sum() {
        let total: ProcessUsage = [
            ProcessUsage { rss_bytes: 10, cpu_time_ms: 1 },
            ProcessUsage { rss_bytes: 5, cpu_time_ms: 2 },
        ]
        .into_iter()
        .sum();
        assert_eq!(total, ProcessUsage { rss_bytes: 15, cpu_time_ms: 3 });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sample_self() {
        let usage = sample(std::process::id()).expect("own process readable");
        assert!(usage.rss_bytes > 0);
    }
}
