//! In-memory views over framebuffer pixel memory
//!
//! Each supported on-device encoding gets its own adapter type. The device
//! layer picks one at surface construction time and hands it out wrapped in
//! [`Surface`].

pub mod bgr565;
pub mod bgra;
pub mod gray16;

use std::fmt;

pub use bgr565::Bgr565;
pub use bgra::Bgra;
pub use gray16::Gray16Image;

/// Half-open rectangle: `[min_x, max_x) x [min_y, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Rect {
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Rectangle of the given size anchored at the origin.
    pub const fn with_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> i32 {
        (self.max_x - self.min_x).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.max_y - self.min_y).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.min_x <= x && x < self.max_x && self.min_y <= y && y < self.max_y
    }

    /// Whether every point of `self` lies in `other`. Empty rectangles are
    /// within everything.
    pub fn is_within(&self, other: &Rect) -> bool {
        if self.is_empty() {
            return true;
        }
        other.min_x <= self.min_x
            && self.max_x <= other.max_x
            && other.min_y <= self.min_y
            && self.max_y <= other.max_y
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if r.is_empty() {
            Rect::default()
        } else {
            r
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// 8-bit color with alpha-premultiplied channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// 8-bit color with straight (non-premultiplied) alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Nrgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// 16-bit luma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gray16(pub u16);

impl Rgba {
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    pub const fn from_bytes(px: [u8; 4]) -> Self {
        Self {
            r: px[0],
            g: px[1],
            b: px[2],
            a: px[3],
        }
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Undo alpha premultiplication.
    ///
    /// Partial alpha is divided out at 16-bit precision and truncated back
    /// to 8 bits.
    #[inline]
    pub fn to_nrgba(self) -> Nrgba {
        match self.a {
            0xff => Nrgba {
                r: self.r,
                g: self.g,
                b: self.b,
                a: 0xff,
            },
            0 => Nrgba::default(),
            _ => {
                let a = widen(self.a);
                let unmul = |v: u8| ((widen(v) * 0xffff / a) >> 8) as u8;
                Nrgba {
                    r: unmul(self.r),
                    g: unmul(self.g),
                    b: unmul(self.b),
                    a: self.a,
                }
            }
        }
    }
}

impl From<Rgba> for Gray16 {
    fn from(c: Rgba) -> Self {
        let (r, g, b) = (widen(c.r), widen(c.g), widen(c.b));
        // Same weights as JFIF luma, scaled to 16.16 fixed point.
        let y = (19595 * r + 38470 * g + 7471 * b + (1 << 15)) >> 16;
        Gray16(y as u16)
    }
}

/// 8-bit channel to 16 bits by replicating the byte.
#[inline]
fn widen(v: u8) -> u32 {
    let v = v as u32;
    v | v << 8
}

/// Per-encoding pixel access over a borrowed byte buffer.
///
/// Reads outside the bounds return the zero color and writes outside the
/// bounds are dropped. The same holds for an in-bounds pixel whose bytes
/// would fall past the end of the buffer.
pub trait PixelAdapter {
    type Color: Copy + Default;
    const BYTES_PER_PIXEL: usize;

    fn bounds(&self) -> Rect;

    fn stride(&self) -> usize;

    #[allow(dead_code)]
    fn get(&self, x: i32, y: i32) -> Self::Color;

    fn set(&mut self, x: i32, y: i32, c: Self::Color);

    /// Byte offset of `(x, y)` relative to the start of the buffer, or
    /// `None` outside [`PixelAdapter::bounds`].
    fn pixel_offset(&self, x: i32, y: i32) -> Option<usize> {
        offset_in(&self.bounds(), self.stride(), Self::BYTES_PER_PIXEL, x, y)
    }
}

fn offset_in(rect: &Rect, stride: usize, bpp: usize, x: i32, y: i32) -> Option<usize> {
    if !rect.contains(x, y) {
        return None;
    }
    let row = usize::try_from(i64::from(y) - i64::from(rect.min_y)).ok()?;
    let col = usize::try_from(i64::from(x) - i64::from(rect.min_x)).ok()?;
    row.checked_mul(stride)?.checked_add(col.checked_mul(bpp)?)
}

/// Byte range of one pixel, if `(x, y)` is inside `rect` and the pixel fits
/// in a buffer of `len` bytes.
pub(crate) fn pixel_range(
    rect: &Rect,
    stride: usize,
    bpp: usize,
    len: usize,
    x: i32,
    y: i32,
) -> Option<std::ops::Range<usize>> {
    let start = offset_in(rect, stride, bpp, x, y)?;
    let end = start.checked_add(bpp)?;
    (end <= len).then_some(start..end)
}

/// A framebuffer pixel surface in one of the supported encodings.
pub enum Surface<'a> {
    Bgr565(Bgr565<'a>),
    Bgra(Bgra<'a>),
    Gray16(Gray16Image<'a>),
}

impl Surface<'_> {
    pub fn bounds(&self) -> Rect {
        match self {
            Surface::Bgr565(s) => s.bounds(),
            Surface::Bgra(s) => s.bounds(),
            Surface::Gray16(s) => s.bounds(),
        }
    }

    #[allow(dead_code)]
    pub fn pixel_offset(&self, x: i32, y: i32) -> Option<usize> {
        match self {
            Surface::Bgr565(s) => s.pixel_offset(x, y),
            Surface::Bgra(s) => s.pixel_offset(x, y),
            Surface::Gray16(s) => s.pixel_offset(x, y),
        }
    }

    pub fn format_name(&self) -> &'static str {
        match self {
            Surface::Bgr565(_) => "BGR565",
            Surface::Bgra(_) => "BGRA",
            Surface::Gray16(_) => "Gray16",
        }
    }

    /// Store a premultiplied color, converting it to the surface's color
    /// model. This is the generic per-pixel path.
    pub fn set_rgba(&mut self, x: i32, y: i32, c: Rgba) {
        match self {
            Surface::Bgr565(s) => s.set(x, y, c.to_nrgba()),
            Surface::Bgra(s) => s.set(x, y, c),
            Surface::Gray16(s) => s.set(x, y, Gray16::from(c)),
        }
    }
}

impl fmt::Debug for Surface<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("format", &self.format_name())
            .field("bounds", &self.bounds())
            .finish()
    }
}
