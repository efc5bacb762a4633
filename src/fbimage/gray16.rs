//! 16 bpp grayscale, stored big-endian.

use super::{pixel_range, Gray16, PixelAdapter, Rect};

pub struct Gray16Image<'a> {
    pub pix: &'a mut [u8],
    pub stride: usize,
    pub rect: Rect,
}

impl<'a> Gray16Image<'a> {
    pub fn new(pix: &'a mut [u8], stride: usize, rect: Rect) -> Self {
        Self { pix, stride, rect }
    }
}

impl PixelAdapter for Gray16Image<'_> {
    type Color = Gray16;
    const BYTES_PER_PIXEL: usize = 2;

    fn bounds(&self) -> Rect {
        self.rect
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn get(&self, x: i32, y: i32) -> Gray16 {
        match pixel_range(&self.rect, self.stride, 2, self.pix.len(), x, y) {
            Some(r) => Gray16(u16::from_be_bytes([self.pix[r.start], self.pix[r.start + 1]])),
            None => Gray16::default(),
        }
    }

    fn set(&mut self, x: i32, y: i32, c: Gray16) {
        if let Some(r) = pixel_range(&self.rect, self.stride, 2, self.pix.len(), x, y) {
            self.pix[r].copy_from_slice(&c.0.to_be_bytes());
        }
    }
}
