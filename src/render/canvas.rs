//! Off-screen RGBA canvas with an 8x8 bitmap font
//!
//! All drawing happens here; the finished frame is copied to the
//! framebuffer in one pass by [`super::copy`].

use font8x8::{UnicodeFonts, BASIC_FONTS};

use crate::fbimage::{Rect, Rgba};

/// Glyph cell size before scaling, in pixels.
pub const GLYPH_SIZE: i32 = 8;

/// Premultiplied RGBA pixels, 4 bytes each, rows packed.
pub struct Canvas {
    pix: Vec<u8>,
    stride: usize,
    rect: Rect,
}

impl Canvas {
    pub fn new(rect: Rect) -> Self {
        let stride = rect.width() as usize * 4;
        Self {
            pix: vec![0; stride * rect.height() as usize],
            stride,
            rect,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.rect
    }

    pub fn pix(&self) -> &[u8] {
        &self.pix
    }

    /// Only meaningful for points inside [`Canvas::bounds`].
    pub fn pixel_offset(&self, x: i32, y: i32) -> usize {
        (y - self.rect.min_y) as usize * self.stride + (x - self.rect.min_x) as usize * 4
    }

    pub fn get(&self, x: i32, y: i32) -> Rgba {
        if !self.rect.contains(x, y) {
            return Rgba::default();
        }
        let i = self.pixel_offset(x, y);
        Rgba::from_bytes([self.pix[i], self.pix[i + 1], self.pix[i + 2], self.pix[i + 3]])
    }

    /// Fill `r` (clipped to the canvas) with `c`, replacing what was there.
    pub fn fill_rect(&mut self, r: Rect, c: Rgba) {
        let r = r.intersect(&self.rect);
        if r.is_empty() {
            return;
        }
        let px = c.to_bytes();
        let len = r.width() as usize * 4;
        for y in r.min_y..r.max_y {
            let start = self.pixel_offset(r.min_x, y);
            for dst in self.pix[start..start + len].chunks_exact_mut(4) {
                dst.copy_from_slice(&px);
            }
        }
    }

    pub fn fill(&mut self, c: Rgba) {
        self.fill_rect(self.rect, c);
    }

    /// Draw `text` with its top-left corner at `(x, y)`, each font pixel
    /// `scale` pixels wide, clipped to `clip`. Characters missing from the
    /// font are drawn as `?`.
    ///
    /// Returns the x coordinate after the last character.
    pub fn draw_text(
        &mut self,
        x: i32,
        y: i32,
        text: &str,
        scale: i32,
        c: Rgba,
        clip: Rect,
    ) -> i32 {
        let clip = clip.intersect(&self.rect);
        let advance = GLYPH_SIZE * scale;
        let mut x = x;
        for ch in text.chars() {
            if x >= clip.max_x {
                break;
            }
            if ch != ' ' {
                let glyph = BASIC_FONTS
                    .get(ch)
                    .or_else(|| BASIC_FONTS.get('?'))
                    .unwrap_or_default();
                self.draw_glyph(x, y, &glyph, scale, c, clip);
            }
            x += advance;
        }
        x
    }

    fn draw_glyph(&mut self, x: i32, y: i32, glyph: &[u8; 8], scale: i32, c: Rgba, clip: Rect) {
        for (row, bits) in (0..).zip(glyph.iter()) {
            for col in 0..GLYPH_SIZE {
                // Bit 0 is the leftmost pixel.
                if (bits >> col) & 1 == 0 {
                    continue;
                }
                let px = Rect::new(
                    x + col * scale,
                    y + row * scale,
                    x + (col + 1) * scale,
                    y + (row + 1) * scale,
                );
                self.fill_rect(px.intersect(&clip), c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba = Rgba::opaque(255, 255, 255);

    #[test]
    fn fill_rect_is_clipped() {
        let mut canvas = Canvas::new(Rect::with_size(4, 4));
        canvas.fill_rect(Rect::new(2, 2, 10, 10), WHITE);
        assert_eq!(canvas.get(3, 3), WHITE);
        assert_eq!(canvas.get(1, 1), Rgba::default());
        assert_eq!(canvas.pix().len(), 4 * 4 * 4);
    }

    #[test]
    fn canvas_with_offset_origin() {
        let rect = Rect::new(10, 20, 14, 22);
        let mut canvas = Canvas::new(rect);
        assert_eq!(canvas.pixel_offset(10, 20), 0);
        assert_eq!(canvas.pixel_offset(11, 21), 16 + 4);
        canvas.fill(WHITE);
        assert_eq!(canvas.get(13, 21), WHITE);
        assert_eq!(canvas.get(0, 0), Rgba::default());
    }

    #[test]
    fn underscore_fills_bottom_row() {
        let mut canvas = Canvas::new(Rect::with_size(16, 8));
        let end = canvas.draw_text(0, 0, "_", 1, WHITE, canvas.bounds());
        assert_eq!(end, 8);
        for x in 0..8 {
            assert_eq!(canvas.get(x, 7), WHITE, "x={x}");
            assert_eq!(canvas.get(x, 0), Rgba::default());
        }
        assert_eq!(canvas.get(8, 7), Rgba::default());
    }

    #[test]
    fn scaled_glyph_covers_block() {
        let mut canvas = Canvas::new(Rect::with_size(32, 32));
        canvas.draw_text(0, 0, "_", 2, WHITE, canvas.bounds());
        assert_eq!(canvas.get(15, 14), WHITE);
        assert_eq!(canvas.get(15, 15), WHITE);
        assert_eq!(canvas.get(15, 13), Rgba::default());
    }

    #[test]
    fn text_is_clipped() {
        let mut canvas = Canvas::new(Rect::with_size(32, 8));
        let clip = Rect::with_size(8, 8);
        canvas.draw_text(0, 0, "__", 1, WHITE, clip);
        assert_eq!(canvas.get(7, 7), WHITE);
        assert_eq!(canvas.get(8, 7), Rgba::default());
    }

    #[test]
    fn unknown_characters_still_draw() {
        let mut canvas = Canvas::new(Rect::with_size(8, 8));
        canvas.draw_text(0, 0, "é", 1, WHITE, canvas.bounds());
        assert!(canvas.pix().chunks_exact(4).any(|p| p == WHITE.to_bytes()));
    }
}
