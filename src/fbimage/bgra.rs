//! 32 bpp color stored as blue, green, red, alpha.

use super::{pixel_range, PixelAdapter, Rect, Rgba};

/// BGRA pixels over a borrowed buffer.
pub struct Bgra<'a> {
    pub pix: &'a mut [u8],
    pub stride: usize,
    pub rect: Rect,
}

impl<'a> Bgra<'a> {
    pub fn new(pix: &'a mut [u8], stride: usize, rect: Rect) -> Self {
        Self { pix, stride, rect }
    }
}

impl PixelAdapter for Bgra<'_> {
    type Color = Rgba;
    const BYTES_PER_PIXEL: usize = 4;

    fn bounds(&self) -> Rect {
        self.rect
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn get(&self, x: i32, y: i32) -> Rgba {
        match pixel_range(&self.rect, self.stride, 4, self.pix.len(), x, y) {
            Some(r) => {
                let p = &self.pix[r];
                Rgba {
                    r: p[2],
                    g: p[1],
                    b: p[0],
                    a: p[3],
                }
            }
            None => Rgba::default(),
        }
    }

    fn set(&mut self, x: i32, y: i32, c: Rgba) {
        if let Some(r) = pixel_range(&self.rect, self.stride, 4, self.pix.len(), x, y) {
            self.pix[r].copy_from_slice(&[c.b, c.g, c.r, c.a]);
        }
    }
}
