//! System resource metrics, formatted as colored text cells
//!
//! A [`MetricsProvider`] names the files it needs, gets their contents once
//! per tick and turns them into one row of cells per module.

pub mod proc;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

pub use proc::default_modules;

/// Width of one value cell, in characters.
pub const CELL_WIDTH: usize = 4;

/// File contents for one tick, keyed by path.
pub type Contents = HashMap<PathBuf, Vec<u8>>;

/// Named text colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorName {
    DarkGray,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl ColorName {
    pub const ALL: [ColorName; 8] = [
        ColorName::DarkGray,
        ColorName::Red,
        ColorName::Green,
        ColorName::Yellow,
        ColorName::Blue,
        ColorName::Magenta,
        ColorName::Cyan,
        ColorName::White,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColorName::DarkGray => "darkgray",
            ColorName::Red => "red",
            ColorName::Green => "green",
            ColorName::Yellow => "yellow",
            ColorName::Blue => "blue",
            ColorName::Magenta => "magenta",
            ColorName::Cyan => "cyan",
            ColorName::White => "white",
        }
    }

    /// Palette entry (Tango-like).
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            ColorName::DarkGray => (0x55, 0x57, 0x53),
            ColorName::Red => (0xef, 0x29, 0x29),
            ColorName::Green => (0x8a, 0xe2, 0x34),
            ColorName::Yellow => (0xfc, 0xe9, 0x4f),
            ColorName::Blue => (0x72, 0x9f, 0xcf),
            ColorName::Magenta => (0xee, 0x38, 0xda),
            ColorName::Cyan => (0x34, 0xe2, 0xe2),
            ColorName::White => (0xee, 0xee, 0xec),
        }
    }
}

impl fmt::Display for ColorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown color name '{0}'")]
pub struct UnknownColor(pub String);

impl FromStr for ColorName {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColorName::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

/// One colored piece of text. `None` draws in the default foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub color: Option<ColorName>,
    pub text: String,
}

impl Field {
    pub fn new(color: ColorName, text: impl Into<String>) -> Self {
        Self {
            color: Some(color),
            text: text.into(),
        }
    }

    /// Placeholder for a value that could not be read.
    pub fn missing() -> Self {
        Self::new(ColorName::DarkGray, format!("{:>CELL_WIDTH$}", "-"))
    }
}

/// One group of columns, e.g. cpu or memory.
pub trait Module: Send {
    fn name(&self) -> &'static str;

    /// Column titles, one per cell returned by [`Module::update`].
    fn headers(&self) -> &'static [&'static str];

    fn file_paths(&self) -> Vec<PathBuf>;

    /// Consume this tick's file contents. `elapsed` is the time since the
    /// previous update, zero on the first one.
    fn update(&mut self, contents: &Contents, elapsed: Duration) -> Vec<Field>;
}

/// Source of the metric rows shown at the bottom of the screen.
pub trait MetricsProvider {
    /// Files to read before every [`MetricsProvider::process_and_format`].
    fn file_paths(&self) -> Vec<PathBuf>;

    /// Column titles per module.
    fn headers(&self) -> Vec<&'static [&'static str]>;

    /// Cells per module, in the order of [`MetricsProvider::headers`].
    fn process_and_format(&mut self, contents: &Contents) -> Vec<Vec<Field>>;
}

/// A provider built from a list of modules.
pub struct Modules {
    modules: Vec<Box<dyn Module>>,
    last_update: Option<Instant>,
}

impl Modules {
    pub fn new(modules: Vec<Box<dyn Module>>) -> Self {
        let names: Vec<_> = modules.iter().map(|m| m.name()).collect();
        debug!("Metric modules: {}", names.join(" "));
        Self {
            modules,
            last_update: None,
        }
    }
}

impl MetricsProvider for Modules {
    fn file_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for path in self.modules.iter().flat_map(|m| m.file_paths()) {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    fn headers(&self) -> Vec<&'static [&'static str]> {
        self.modules.iter().map(|m| m.headers()).collect()
    }

    fn process_and_format(&mut self, contents: &Contents) -> Vec<Vec<Field>> {
        let now = Instant::now();
        let elapsed = self
            .last_update
            .map(|t| now.duration_since(t))
            .unwrap_or_default();
        self.last_update = Some(now);
        self.modules
            .iter_mut()
            .map(|m| m.update(contents, elapsed))
            .collect()
    }
}

/// Metric files, opened once and re-read from the start every tick.
pub struct Sources {
    files: Vec<(PathBuf, File)>,
}

impl Sources {
    pub fn open(paths: impl IntoIterator<Item = PathBuf>) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            let file =
                File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            files.push((path, file));
        }
        Ok(Self { files })
    }

    pub fn read_all(&mut self) -> Result<Contents> {
        let mut contents = Contents::with_capacity(self.files.len());
        for (path, file) in &mut self.files {
            contents.insert(path.clone(), reread(path, file)?);
        }
        Ok(contents)
    }
}

fn reread(path: &Path, file: &mut File) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))
        .with_context(|| format!("Failed to rewind {}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(buf)
}

/// Percentage cell, colored by load.
pub fn percent(value: f64) -> Field {
    let v = value.clamp(0.0, 100.0).round() as u64;
    let color = match v {
        0 => ColorName::DarkGray,
        1..=49 => ColorName::Green,
        50..=79 => ColorName::Yellow,
        _ => ColorName::Red,
    };
    Field::new(color, format!("{v:>CELL_WIDTH$}"))
}

pub const BYTE_UNITS: &[&str] = &["B", "k", "M", "G", "T"];
pub const COUNT_UNITS: &[&str] = &["", "k", "M", "G", "T"];

/// Scale `value` down by `base` until it fits a cell; the unit reached
/// picks the color.
pub fn scaled(value: f64, base: f64, units: &[&str]) -> Field {
    if value < 0.5 {
        let text = format!("0{}", units.first().copied().unwrap_or(""));
        return Field::new(ColorName::DarkGray, format!("{text:>CELL_WIDTH$}"));
    }
    let mut v = value;
    let mut text = String::new();
    let mut level = 0;
    for (i, unit) in units.iter().enumerate() {
        level = i;
        text = if i > 0 && v < 9.95 {
            format!("{v:.1}{unit}")
        } else {
            format!("{v:.0}{unit}")
        };
        if text.len() <= CELL_WIDTH {
            break;
        }
        v /= base;
    }
    let color = match level {
        0 => ColorName::White,
        1 => ColorName::Green,
        2 => ColorName::Yellow,
        _ => ColorName::Red,
    };
    Field::new(color, format!("{text:>CELL_WIDTH$}"))
}

/// Per-second rate between two counter samples. Zero without a previous
/// sample or elapsed time; counter resets count as zero.
pub fn rate(prev: Option<u64>, now: u64, elapsed: Duration) -> f64 {
    match prev {
        Some(prev) if !elapsed.is_zero() => now.saturating_sub(prev) as f64 / elapsed.as_secs_f64(),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn color_names_parse() {
        for c in ColorName::ALL {
            assert_eq!(c.name().parse::<ColorName>().unwrap(), c);
        }
        assert_eq!("red".parse::<ColorName>().unwrap().rgb(), (0xef, 0x29, 0x29));
        assert!("Red".parse::<ColorName>().is_err());
        assert!("purple".parse::<ColorName>().is_err());
    }

    #[test]
    fn percent_cells() {
        assert_eq!(percent(0.0), Field::new(ColorName::DarkGray, "   0"));
        assert_eq!(percent(12.4), Field::new(ColorName::Green, "  12"));
        assert_eq!(percent(100.0), Field::new(ColorName::Red, " 100"));
        assert_eq!(percent(250.0).text, " 100");
    }

    #[test]
    fn scaled_cells_fit() {
        assert_eq!(scaled(0.0, 1024.0, BYTE_UNITS).text, "  0B");
        assert_eq!(scaled(999.0, 1024.0, BYTE_UNITS), Field::new(ColorName::White, "999B"));
        assert_eq!(scaled(1536.0, 1024.0, BYTE_UNITS), Field::new(ColorName::Green, "1.5k"));
        assert_eq!(scaled(12.0 * 1024.0 * 1024.0, 1024.0, BYTE_UNITS).text, " 12M");
        assert_eq!(scaled(9999.0, 1000.0, COUNT_UNITS).text, "9999");
        assert_eq!(scaled(12345.0, 1000.0, COUNT_UNITS).text, " 12k");
        for v in [1.0, 10.0, 1e3, 1e5, 1e7, 1e9, 1e12] {
            assert_eq!(scaled(v, 1024.0, BYTE_UNITS).text.len(), CELL_WIDTH, "{v}");
        }
    }

    #[test]
    fn rate_handles_first_sample_and_reset() {
        let second = Duration::from_secs(1);
        assert_eq!(rate(None, 100, second), 0.0);
        assert_eq!(rate(Some(100), 300, Duration::from_secs(2)), 100.0);
        assert_eq!(rate(Some(300), 100, second), 0.0);
        assert_eq!(rate(Some(1), 2, Duration::ZERO), 0.0);
    }

    #[test]
    fn sources_reread_from_start() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "one").unwrap();
        let path = file.path().to_path_buf();

        let mut sources = Sources::open([path.clone()]).unwrap();
        assert_eq!(sources.read_all().unwrap()[&path], b"one");

        file.as_file_mut().set_len(0).unwrap();
        file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        write!(file, "two!").unwrap();
        assert_eq!(sources.read_all().unwrap()[&path], b"two!");
    }

    #[test]
    fn sources_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Sources::open([dir.path().join("nope")]).is_err());
    }
}
