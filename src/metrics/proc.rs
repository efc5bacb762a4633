//! Built-in modules reading `/proc`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::{
    percent, rate, scaled, Contents, Field, Module, Modules, BYTE_UNITS, COUNT_UNITS,
};

/// cpu, disk, system, net and memory, in that order.
pub fn default_modules(proc_root: impl AsRef<Path>) -> Modules {
    let proc_root = proc_root.as_ref();
    Modules::new(vec![
        Box::new(Cpu::new(proc_root)),
        Box::new(Disk::new(proc_root)),
        Box::new(System::new(proc_root)),
        Box::new(Net::new(proc_root)),
        Box::new(Memory::new(proc_root)),
    ])
}

fn text<'a>(contents: &'a Contents, path: &Path) -> Option<&'a str> {
    let bytes = contents.get(path)?;
    std::str::from_utf8(bytes).ok()
}

fn missing(n: usize) -> Vec<Field> {
    vec![Field::missing(); n]
}

fn numbers(s: &str) -> impl Iterator<Item = u64> + '_ {
    s.split_whitespace().map_while(|v| v.parse().ok())
}

/// CPU time split, from the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub steal: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        self.user + self.system + self.idle + self.iowait + self.steal
    }

    fn since(&self, prev: &CpuTimes) -> CpuTimes {
        CpuTimes {
            user: self.user.saturating_sub(prev.user),
            system: self.system.saturating_sub(prev.system),
            idle: self.idle.saturating_sub(prev.idle),
            iowait: self.iowait.saturating_sub(prev.iowait),
            steal: self.steal.saturating_sub(prev.steal),
        }
    }
}

pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let v: Vec<u64> = numbers(&line[4..]).collect();
    // user nice system idle iowait irq softirq steal
    if v.len() < 8 {
        return None;
    }
    Some(CpuTimes {
        user: v[0] + v[1],
        system: v[2] + v[5] + v[6],
        idle: v[3],
        iowait: v[4],
        steal: v[7],
    })
}

pub struct Cpu {
    path: PathBuf,
    prev: CpuTimes,
}

impl Cpu {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("stat"),
            prev: CpuTimes::default(),
        }
    }
}

impl Module for Cpu {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["usr", "sys", "idl", "wai", "stl"]
    }

    fn file_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn update(&mut self, contents: &Contents, _elapsed: Duration) -> Vec<Field> {
        let Some(now) = text(contents, &self.path).and_then(parse_cpu_times) else {
            debug!("cpu: no usable {}", self.path.display());
            return missing(5);
        };
        let delta = now.since(&self.prev);
        self.prev = now;
        let total = delta.total().max(1) as f64;
        [delta.user, delta.system, delta.idle, delta.iowait, delta.steal]
            .into_iter()
            .map(|v| percent(v as f64 * 100.0 / total))
            .collect()
    }
}

/// Whole disks only; partitions and virtual devices would double count.
fn is_whole_disk(name: &str) -> bool {
    if name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("sr")
        || name.starts_with("fd")
        || name.starts_with("dm-")
        || name.starts_with("md")
        || name.starts_with("zram")
    {
        return false;
    }

    // sdX, vdX, xvdX, hdX without partition digits
    for prefix in ["sd", "vd", "xvd", "hd"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase());
        }
    }

    // nvme0n1, mmcblk0 (partitions: nvme0n1p1, mmcblk0p1)
    if let Some(rest) = name
        .strip_prefix("nvme")
        .or_else(|| name.strip_prefix("mmcblk"))
    {
        return !rest.is_empty() && !rest.contains('p');
    }

    false
}

/// Sectors read and written over all whole disks in `/proc/diskstats`.
pub fn parse_disk_sectors(diskstats: &str) -> (u64, u64) {
    let mut read = 0;
    let mut written = 0;
    for line in diskstats.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        // major minor name reads merged sectors_read ms writes merged sectors_written
        if cols.len() < 10 || !is_whole_disk(cols[2]) {
            continue;
        }
        read += cols[5].parse::<u64>().unwrap_or(0);
        written += cols[9].parse::<u64>().unwrap_or(0);
    }
    (read, written)
}

/// diskstats counts in 512-byte units regardless of the device.
const SECTOR_SIZE: u64 = 512;

pub struct Disk {
    path: PathBuf,
    prev: Option<(u64, u64)>,
}

impl Disk {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("diskstats"),
            prev: None,
        }
    }
}

impl Module for Disk {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["read", "writ"]
    }

    fn file_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn update(&mut self, contents: &Contents, elapsed: Duration) -> Vec<Field> {
        let Some(stats) = text(contents, &self.path) else {
            return missing(2);
        };
        let (read, written) = parse_disk_sectors(stats);
        let (read, written) = (read * SECTOR_SIZE, written * SECTOR_SIZE);
        let prev = self.prev.replace((read, written));
        vec![
            scaled(rate(prev.map(|p| p.0), read, elapsed), 1024.0, BYTE_UNITS),
            scaled(rate(prev.map(|p| p.1), written, elapsed), 1024.0, BYTE_UNITS),
        ]
    }
}

/// Interrupt and context switch totals from `/proc/stat`.
pub fn parse_interrupts_and_switches(stat: &str) -> Option<(u64, u64)> {
    let mut intr = None;
    let mut ctxt = None;
    for line in stat.lines() {
        if let Some(rest) = line.strip_prefix("intr ") {
            intr = numbers(rest).next();
        } else if let Some(rest) = line.strip_prefix("ctxt ") {
            ctxt = numbers(rest).next();
        }
    }
    Some((intr?, ctxt?))
}

pub struct System {
    path: PathBuf,
    prev: Option<(u64, u64)>,
}

impl System {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("stat"),
            prev: None,
        }
    }
}

impl Module for System {
    fn name(&self) -> &'static str {
        "system"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["int", "csw"]
    }

    fn file_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn update(&mut self, contents: &Contents, elapsed: Duration) -> Vec<Field> {
        let Some((intr, ctxt)) = text(contents, &self.path).and_then(parse_interrupts_and_switches)
        else {
            return missing(2);
        };
        let prev = self.prev.replace((intr, ctxt));
        vec![
            scaled(rate(prev.map(|p| p.0), intr, elapsed), 1000.0, COUNT_UNITS),
            scaled(rate(prev.map(|p| p.1), ctxt, elapsed), 1000.0, COUNT_UNITS),
        ]
    }
}

/// Bytes received and sent over all interfaces but loopback.
pub fn parse_net_bytes(netdev: &str) -> (u64, u64) {
    let mut recv = 0;
    let mut send = 0;
    // Two header lines, then "iface: rx_bytes ... (8 rx columns) tx_bytes ..."
    for line in netdev.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let v: Vec<u64> = numbers(counters).collect();
        if v.len() < 9 {
            continue;
        }
        recv += v[0];
        send += v[8];
    }
    (recv, send)
}

pub struct Net {
    path: PathBuf,
    prev: Option<(u64, u64)>,
}

impl Net {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("net").join("dev"),
            prev: None,
        }
    }
}

impl Module for Net {
    fn name(&self) -> &'static str {
        "net"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["recv", "send"]
    }

    fn file_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn update(&mut self, contents: &Contents, elapsed: Duration) -> Vec<Field> {
        let Some(netdev) = text(contents, &self.path) else {
            return missing(2);
        };
        let (recv, send) = parse_net_bytes(netdev);
        let prev = self.prev.replace((recv, send));
        vec![
            scaled(rate(prev.map(|p| p.0), recv, elapsed), 1024.0, BYTE_UNITS),
            scaled(rate(prev.map(|p| p.1), send, elapsed), 1024.0, BYTE_UNITS),
        ]
    }
}

/// Memory split in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUse {
    pub used: u64,
    pub free: u64,
    pub buffers: u64,
    pub cached: u64,
}

pub fn parse_meminfo(meminfo: &str) -> Option<MemoryUse> {
    let mut total = None;
    let mut free = None;
    let mut buffers = 0;
    let mut cached = 0;
    let mut reclaimable = 0;
    for line in meminfo.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        // Values are in kB.
        let Some(kb) = numbers(rest).next() else {
            continue;
        };
        let bytes = kb * 1024;
        match key {
            "MemTotal" => total = Some(bytes),
            "MemFree" => free = Some(bytes),
            "Buffers" => buffers = bytes,
            "Cached" => cached = bytes,
            "SReclaimable" => reclaimable = bytes,
            _ => {}
        }
    }
    let (total, free) = (total?, free?);
    let cached = cached + reclaimable;
    Some(MemoryUse {
        used: total.saturating_sub(free + buffers + cached),
        free,
        buffers,
        cached,
    })
}

pub struct Memory {
    path: PathBuf,
}

impl Memory {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("meminfo"),
        }
    }
}

impl Module for Memory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["used", "free", "buff", "cach"]
    }

    fn file_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn update(&mut self, contents: &Contents, _elapsed: Duration) -> Vec<Field> {
        let Some(mem) = text(contents, &self.path).and_then(parse_meminfo) else {
            return missing(4);
        };
        [mem.used, mem.free, mem.buffers, mem.cached]
            .into_iter()
            .map(|v| scaled(v as f64, 1024.0, BYTE_UNITS))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ColorName, MetricsProvider};

    const STAT: &str = "\
cpu  100 0 50 800 50 0 0 0 0 0
cpu0 100 0 50 800 50 0 0 0 0 0
intr 5000 0 9 0 0
ctxt 12000
btime 1700000000
";

    const STAT_LATER: &str = "\
cpu  200 0 100 1550 100 0 0 50 0 0
intr 6000 0 9 0 0
ctxt 14000
";

    const DISKSTATS: &str = "\
   7       0 loop0 10 0 80 0 0 0 0 0 0 0 0
   8       0 sda 100 0 2048 10 50 0 4096 20 0 30 30
   8       1 sda1 90 0 2000 10 50 0 4096 20 0 30 30
 259       0 nvme0n1 10 0 1024 1 5 0 512 1 0 2 2
 259       1 nvme0n1p1 10 0 1024 1 5 0 512 1 0 2 2
 179       0 mmcblk0 1 0 8 0 1 0 8 0 0 0 0
";

    const NETDEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  999999     100    0    0    0     0          0         0   999999     100    0    0    0     0       0          0
  eth0:    1000      10    0    0    0     0          0         0     2000      20    0    0    0     0       0          0
 wlan0:     500       5    0    0    0     0          0         0      100       1    0    0    0     0       0          0
";

    const MEMINFO: &str = "\
MemTotal:        1000000 kB
MemFree:          400000 kB
MemAvailable:     700000 kB
Buffers:           50000 kB
Cached:           200000 kB
SReclaimable:      50000 kB
";

    fn contents(root: &Path, files: &[(&str, &str)]) -> Contents {
        files
            .iter()
            .map(|(name, text)| (root.join(name), text.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_cpu_times() {
        let t = parse_cpu_times(STAT).unwrap();
        assert_eq!(
            t,
            CpuTimes {
                user: 100,
                system: 50,
                idle: 800,
                iowait: 50,
                steal: 0
            }
        );
        assert!(parse_cpu_times("cpu 1 2\n").is_none());
    }

    #[test]
    fn test_cpu_percentages_use_delta() {
        let root = Path::new("/proc");
        let mut cpu = Cpu::new(root);
        let first = cpu.update(&contents(root, &[("stat", STAT)]), Duration::ZERO);
        assert_eq!(first[0].text, "  10");
        assert_eq!(first[2].text, "  80");

        // delta: usr 100, sys 50, idl 750, wai 50, stl 50 of 1000
        let second = cpu.update(&contents(root, &[("stat", STAT_LATER)]), Duration::from_secs(1));
        let texts: Vec<&str> = second.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, ["  10", "   5", "  75", "   5", "   5"]);
        assert_eq!(second[2].color, Some(ColorName::Yellow));
    }

    #[test]
    fn test_whole_disk_names() {
        for name in ["sda", "vdb", "xvda", "nvme0n1", "mmcblk0"] {
            assert!(is_whole_disk(name), "{name}");
        }
        for name in ["sda1", "nvme0n1p1", "mmcblk0p2", "loop0", "dm-0", "zram0", "md127"] {
            assert!(!is_whole_disk(name), "{name}");
        }
    }

    #[test]
    fn test_disk_sectors_skip_partitions() {
        assert_eq!(parse_disk_sectors(DISKSTATS), (2048 + 1024 + 8, 4096 + 512 + 8));
    }

    #[test]
    fn test_disk_rates() {
        let root = Path::new("/proc");
        let mut disk = Disk::new(root);
        let first = disk.update(&contents(root, &[("diskstats", DISKSTATS)]), Duration::ZERO);
        assert!(first.iter().all(|f| f.color == Some(ColorName::DarkGray)));

        let later = DISKSTATS.replace("sda 100 0 2048", "sda 100 0 4096");
        let second = disk.update(&contents(root, &[("diskstats", &later)]), Duration::from_secs(1));
        // 2048 more sectors in one second
        assert_eq!(second[0].text, "1.0M");
        assert_eq!(second[1].text, "  0B");
    }

    #[test]
    fn test_interrupts_and_switches() {
        assert_eq!(parse_interrupts_and_switches(STAT), Some((5000, 12000)));
        assert_eq!(parse_interrupts_and_switches("cpu 1\n"), None);

        let root = Path::new("/proc");
        let mut system = System::new(root);
        system.update(&contents(root, &[("stat", STAT)]), Duration::ZERO);
        let fields = system.update(&contents(root, &[("stat", STAT_LATER)]), Duration::from_secs(2));
        assert_eq!(fields[0].text, " 500");
        assert_eq!(fields[1].text, "1000");
    }

    #[test]
    fn test_net_skips_loopback() {
        assert_eq!(parse_net_bytes(NETDEV), (1500, 2100));
    }

    #[test]
    fn test_meminfo() {
        let mem = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(mem.free, 400000 * 1024);
        assert_eq!(mem.buffers, 50000 * 1024);
        assert_eq!(mem.cached, 250000 * 1024);
        assert_eq!(mem.used, 300000 * 1024);
        assert!(parse_meminfo("Buffers: 1 kB\n").is_none());
    }

    #[test]
    fn test_missing_file_gives_placeholders() {
        let root = Path::new("/proc");
        let mut provider = default_modules(root);
        let rows = provider.process_and_format(&Contents::new());
        let widths: Vec<usize> = rows.iter().map(Vec::len).collect();
        assert_eq!(widths, [5, 2, 2, 2, 4]);
        assert!(rows.iter().flatten().all(|f| f.text == "   -"));
    }

    #[test]
    fn test_provider_headers_and_paths() {
        let root = Path::new("/proc");
        let provider = default_modules(root);
        let headers = provider.headers();
        assert_eq!(headers.len(), 5);
        assert_eq!(headers[4], &["used", "free", "buff", "cach"]);
        // stat is shared by cpu and system
        let paths = provider.file_paths();
        assert_eq!(
            paths,
            [
                root.join("stat"),
                root.join("diskstats"),
                root.join("net").join("dev"),
                root.join("meminfo")
            ]
        );
    }

    #[test]
    fn test_full_row_from_fixtures() {
        let root = Path::new("/proc");
        let mut provider = default_modules(root);
        let all = contents(
            root,
            &[
                ("stat", STAT),
                ("diskstats", DISKSTATS),
                ("net/dev", NETDEV),
                ("meminfo", MEMINFO),
            ],
        );
        let rows = provider.process_and_format(&all);
        assert!(rows.iter().flatten().all(|f| f.text.len() == 4));
        assert_eq!(rows[4][0].text, "293M");
    }
}
