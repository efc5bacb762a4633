//! Status screen layout and drawing
//!
//! The screen is split into two columns on top and one area at the bottom:
//!
//! ```text
//!  -------------------------
//! | host info    | fbstatus |
//! |              |          |
//! | IP addresses |          |
//! |-------------------------|
//! |   metrics table         |
//!  -------------------------
//! ```
//!
//! Everything is drawn into an RGBA [`Canvas`] and copied to the
//! framebuffer at the end of each frame. The tagline is drawn once per
//! geometry; the other areas are redrawn every frame.

pub mod canvas;
pub mod copy;
pub mod scrollback;

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::fbimage::{Rect, Rgba, Surface};
use crate::metrics::{Field, MetricsProvider, Sources, CELL_WIDTH};
use crate::platform::{self, Host, InterfaceAddrs};

pub use canvas::{Canvas, GLYPH_SIZE};
pub use copy::copy_to_surface;
pub use scrollback::Scrollback;

pub const BACKGROUND: Rgba = Rgba::opaque(50, 50, 50);
pub const FOREGROUND: Rgba = Rgba::opaque(255, 255, 255);
pub const TAGLINE: &str = "fbstatus";

/// Blank columns between two metric modules.
const MODULE_GAP: i32 = 3;

/// Integer glyph scale for a screen `width` pixels wide.
pub fn scale_for(width: i32) -> i32 {
    (width / 960).max(1)
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    host: Rect,
    tagline: Rect,
    stats: Rect,
    scale: i32,
}

impl Layout {
    fn new(b: Rect) -> Self {
        let mid_x = b.min_x + b.width() / 2;
        let mid_y = b.min_y + b.height() / 2;
        Self {
            host: Rect::new(b.min_x, b.min_y, mid_x, mid_y),
            tagline: Rect::new(mid_x, b.min_y, b.max_x, mid_y),
            stats: Rect::new(b.min_x, mid_y, b.max_x, b.max_y),
            scale: scale_for(b.width()),
        }
    }

    /// Width of one character cell.
    fn em(&self) -> i32 {
        GLYPH_SIZE * self.scale
    }

    fn line_height(&self) -> i32 {
        self.em() * 3 / 2
    }
}

fn field_color(field: &Field) -> Rgba {
    match field.color {
        Some(c) => {
            let (r, g, b) = c.rgb();
            Rgba::opaque(r, g, b)
        }
        None => FOREGROUND,
    }
}

fn millis(d: Duration) -> String {
    format!("{}ms", (d.as_micros() + 500) / 1000)
}

/// Cells per module for one tick.
type Row = Vec<Vec<Field>>;

/// Renders the status screen, one frame per [`StatusDrawer::draw`].
pub struct StatusDrawer<P> {
    canvas: Canvas,
    layout: Layout,
    provider: P,
    sources: Sources,
    headers: Vec<&'static [&'static str]>,
    host: Host,
    hostname: String,
    model: Option<String>,
    rows: Scrollback<Row>,
    slow_path_notified: bool,
    last_render: Duration,
    last_copy: Duration,
}

impl<P: MetricsProvider> StatusDrawer<P> {
    /// Set up drawing for a surface with the given bounds. The metric files
    /// named by `provider` are opened here and kept open.
    pub fn new(bounds: Rect, provider: P, host: Host, scrollback: usize) -> Result<Self> {
        let sources = Sources::open(provider.file_paths())?;
        let hostname = platform::hostname().unwrap_or_else(|e| {
            warn!("{e:#}");
            String::new()
        });
        let model = host.model();
        let headers = provider.headers();
        let mut drawer = Self {
            canvas: Canvas::new(bounds),
            layout: Layout::new(bounds),
            provider,
            sources,
            headers,
            host,
            hostname,
            model,
            rows: Scrollback::new(scrollback),
            slow_path_notified: false,
            last_render: Duration::ZERO,
            last_copy: Duration::ZERO,
        };
        drawer.reset(bounds);
        Ok(drawer)
    }

    fn reset(&mut self, bounds: Rect) {
        self.canvas = Canvas::new(bounds);
        self.layout = Layout::new(bounds);
        info!("Status screen {bounds}, font scale {}", self.layout.scale);
        self.canvas.fill(BACKGROUND);
        self.draw_tagline();
    }

    /// Sample metrics, redraw and copy the frame onto `surface`.
    ///
    /// A surface with different bounds than the previous one (mode change
    /// or panning) starts over with a fresh canvas.
    pub fn draw(&mut self, surface: &mut Surface<'_>) -> Result<()> {
        let bounds = surface.bounds();
        if bounds != self.canvas.bounds() {
            info!("Framebuffer geometry changed to {bounds}");
            self.reset(bounds);
        }

        let contents = self.sources.read_all()?;
        self.rows.push(self.provider.process_and_format(&contents));

        let t = Instant::now();
        self.draw_stats();
        self.draw_host();
        self.last_render = t.elapsed();

        let t = Instant::now();
        copy_to_surface(surface, &self.canvas, &mut self.slow_path_notified);
        self.last_copy = t.elapsed();

        debug!(
            "Frame drawn in {:?}, copied in {:?}",
            self.last_render, self.last_copy
        );
        Ok(())
    }

    fn draw_tagline(&mut self) {
        let area = self.layout.tagline;
        let scale = self.layout.scale * 2;
        let width = TAGLINE.len() as i32 * GLYPH_SIZE * scale;
        let x = area.min_x + (area.width() - width).max(0) / 2;
        let y = area.min_y + 3 * self.layout.em();
        self.canvas.draw_text(x, y, TAGLINE, scale, FOREGROUND, area);
    }

    fn host_lines(&self) -> Vec<String> {
        let model = self.model.as_deref().unwrap_or("unknown model");
        let mut lines = vec![format!("host \"{}\" ({model})", self.hostname)];
        match platform::now_rfc3339() {
            Ok(now) => lines.push(format!("time: {now}")),
            Err(e) => debug!("localtime: {e}"),
        }
        match self.host.uptime() {
            Ok(up) => lines.push(format!("up for {}", platform::format_uptime(up))),
            Err(e) => debug!("{e:#}"),
        }
        if !self.last_render.is_zero() || !self.last_copy.is_zero() {
            lines.push(format!(
                "fb: draw {}, cp {}",
                millis(self.last_render),
                millis(self.last_copy)
            ));
        }

        let addrs = platform::interface_addrs().unwrap_or_else(|e| {
            debug!("{e:#}");
            InterfaceAddrs::default()
        });
        lines.push(String::new());
        lines.push("Private IP addresses:".to_string());
        lines.extend(addrs.private.iter().map(ToString::to_string));
        lines.push(String::new());
        lines.push("Public IP addresses:".to_string());
        lines.extend(addrs.public.iter().map(ToString::to_string));
        lines
    }

    fn draw_host(&mut self) {
        let lines = self.host_lines();
        let area = self.layout.host;
        let em = self.layout.em();
        self.canvas.fill_rect(area, BACKGROUND);

        let x = area.min_x + 3 * em;
        let mut y = area.min_y + 3 * em;
        for line in &lines {
            self.canvas
                .draw_text(x, y, line, self.layout.scale, FOREGROUND, area);
            y += self.layout.line_height();
        }
    }

    fn draw_stats(&mut self) {
        let area = self.layout.stats;
        let scale = self.layout.scale;
        let em = self.layout.em();
        self.canvas.fill_rect(area, BACKGROUND);

        let x0 = area.min_x + 3 * em;
        let mut y = area.min_y + 3 * em;

        let mut x = x0;
        for (i, titles) in self.headers.iter().enumerate() {
            if i > 0 {
                let sep = x - (MODULE_GAP - 1) * em;
                self.canvas.draw_text(sep, y, "|", scale, FOREGROUND, area);
            }
            for title in titles.iter() {
                let cell = format!("{title:>CELL_WIDTH$}");
                x = self.canvas.draw_text(x + em, y, &cell, scale, FOREGROUND, area);
            }
            x += MODULE_GAP * em;
        }
        y += 2 * self.layout.line_height();

        for row in self.rows.iter() {
            let mut x = x0;
            for fields in row {
                for field in fields {
                    x = self
                        .canvas
                        .draw_text(x + em, y, &field.text, scale, field_color(field), area);
                }
                x += MODULE_GAP * em;
            }
            y += self.layout.line_height();
        }
    }
}
