//! Runtime settings, taken from the environment.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fb::FB_DEVICE;

pub const ENV_FB_DEVICE: &str = "FBSTATUS_FB_DEVICE";
pub const ENV_TICK_MS: &str = "FBSTATUS_TICK_MS";
pub const ENV_SCROLLBACK: &str = "FBSTATUS_SCROLLBACK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Framebuffer device node
    pub fb_device: PathBuf,
    /// Interval between metric refreshes
    pub tick: Duration,
    /// Number of metric rows kept on screen
    pub scrollback: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fb_device: PathBuf::from(FB_DEVICE),
            tick: Duration::from_secs(1),
            scrollback: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from `lookup`, falling back to defaults for keys it
    /// does not know.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dev) = lookup(ENV_FB_DEVICE) {
            if dev.trim().is_empty() {
                bail!("{ENV_FB_DEVICE} is set but empty");
            }
            config.fb_device = PathBuf::from(dev);
        }
        if let Some(ms) = lookup(ENV_TICK_MS) {
            config.tick = Duration::from_millis(parse_positive(ENV_TICK_MS, &ms)?);
        }
        if let Some(rows) = lookup(ENV_SCROLLBACK) {
            config.scrollback = parse_positive(ENV_SCROLLBACK, &rows)?;
        }

        Ok(config)
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let v: T = value
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {key}='{value}'"))?;
    if v == T::default() {
        bail!("{key} must be greater than zero");
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.fb_device, PathBuf::from("/dev/fb0"));
        assert_eq!(config.tick, Duration::from_secs(1));
        assert_eq!(config.scrollback, 10);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            (ENV_FB_DEVICE, "/dev/fb1"),
            (ENV_TICK_MS, "250"),
            (ENV_SCROLLBACK, " 4 "),
        ]))
        .unwrap();
        assert_eq!(config.fb_device, PathBuf::from("/dev/fb1"));
        assert_eq!(config.tick, Duration::from_millis(250));
        assert_eq!(config.scrollback, 4);
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[(ENV_TICK_MS, "soon")])).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_TICK_MS));

        assert!(Config::from_lookup(lookup(&[(ENV_TICK_MS, "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[(ENV_SCROLLBACK, "-1")])).is_err());
        assert!(Config::from_lookup(lookup(&[(ENV_FB_DEVICE, " ")])).is_err());
    }
}
