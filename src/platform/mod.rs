//! Host facts for the status screen
//!
//! Host name, hardware model, clock, uptime and interface addresses. File
//! based facts are read relative to configurable `/proc` and `/sys` roots so
//! they can be tested against a temporary tree.

use anyhow::{anyhow, Context, Result};
use nix::libc;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Host {
    sys_root: PathBuf,
    proc_root: PathBuf,
}

impl Host {
    pub fn new(sys_root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            proc_root: proc_root.into(),
        }
    }

    pub fn new_default() -> Self {
        Self::new("/sys", "/proc")
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Time since boot, rounded to the second.
    pub fn uptime(&self) -> Result<Duration> {
        let path = self.proc_root.join("uptime");
        let s = read_string(&path)?;
        let first = s
            .split_whitespace()
            .next()
            .ok_or_else(|| anyhow!("Empty {}", path.display()))?;
        let secs: f64 = first
            .parse()
            .with_context(|| format!("Failed to parse '{}' from {}", first, path.display()))?;
        Ok(Duration::from_secs(secs.max(0.0).round() as u64))
    }

    /// Board model from the device tree, else the DMI product name.
    pub fn model(&self) -> Option<String> {
        let candidates = [
            self.proc_root.join("device-tree").join("model"),
            self.sys_root.join("class/dmi/id/product_name"),
        ];
        candidates
            .iter()
            .filter_map(|p| read_string(p).ok())
            .find(|s| !s.is_empty())
    }
}

/// Device tree strings carry a trailing NUL.
fn read_string(path: impl AsRef<Path>) -> Result<String> {
    let s = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    Ok(s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
}

pub fn hostname() -> Result<String> {
    let name = nix::unistd::gethostname().context("Failed to get hostname")?;
    Ok(name.to_string_lossy().into_owned())
}

/// `1h2m3s`, `4m0s`, `5s`.
pub fn format_uptime(d: Duration) -> String {
    let s = d.as_secs();
    let (h, m, s) = (s / 3600, s % 3600 / 60, s % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Current local time, e.g. `2024-03-09T14:05:00+01:00`.
pub fn now_rfc3339() -> std::io::Result<String> {
    // SAFETY: time() with a null pointer only returns the value.
    let now = unsafe { libc::time(std::ptr::null_mut()) };
    // SAFETY: tm is plain data; localtime_r fills it and keeps no reference.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    if unsafe { libc::localtime_r(&now, &mut tm) }.is_null() {
        return Err(std::io::Error::last_os_error());
    }
    Ok(rfc3339(&tm))
}

fn rfc3339(tm: &libc::tm) -> String {
    let offset = tm.tm_gmtoff;
    let zone = if offset == 0 {
        "Z".to_string()
    } else {
        let sign = if offset < 0 { '-' } else { '+' };
        let mins = offset.abs() / 60;
        format!("{sign}{:02}:{:02}", mins / 60, mins % 60)
    };
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}{zone}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}

/// Interface addresses split by reachability. Loopback is never listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddrs {
    pub private: Vec<IpAddr>,
    pub public: Vec<IpAddr>,
}

impl InterfaceAddrs {
    /// Sort and split; loopback and unspecified addresses are dropped.
    pub fn classify(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut all: Vec<IpAddr> = addrs
            .into_iter()
            .filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
            .collect();
        all.sort();
        all.dedup();
        let (private, public) = all.into_iter().partition(is_private);
        Self { private, public }
    }
}

/// RFC 1918, link-local, and IPv6 unique-local/link-local addresses.
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80 || v6.is_loopback()
        }
    }
}

pub fn interface_addrs() -> Result<InterfaceAddrs> {
    let ifaddrs = nix::ifaddrs::getifaddrs().context("Failed to list interface addresses")?;
    let addrs = ifaddrs.filter_map(|ifa| {
        let addr = ifa.address?;
        if let Some(v4) = addr.as_sockaddr_in() {
            Some(IpAddr::V4(v4.ip()))
        } else {
            addr.as_sockaddr_in6().map(|v6| IpAddr::V6(v6.ip()))
        }
    });
    Ok(InterfaceAddrs::classify(addrs))
}
