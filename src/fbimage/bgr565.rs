//! 16 bpp packed color: 5 bits blue, 6 bits green, 5 bits red, little-endian.

use super::{pixel_range, Nrgba, PixelAdapter, Rect};

/// BGR565 pixels over a borrowed buffer.
pub struct Bgr565<'a> {
    pub pix: &'a mut [u8],
    pub stride: usize,
    pub rect: Rect,
}

impl<'a> Bgr565<'a> {
    pub fn new(pix: &'a mut [u8], stride: usize, rect: Rect) -> Self {
        Self { pix, stride, rect }
    }
}

/// Pack into the two on-device bytes.
#[inline]
pub fn pack(c: Nrgba) -> [u8; 2] {
    [(c.b >> 3) | ((c.g >> 2) << 5), (c.g >> 5) | ((c.r >> 3) << 3)]
}

/// Unpack two on-device bytes. Alpha is always opaque.
#[inline]
pub fn unpack(px: [u8; 2]) -> Nrgba {
    Nrgba {
        r: (px[1] >> 3) << 3,
        g: (px[1] << 5) | ((px[0] >> 5) << 2),
        b: px[0] << 3,
        a: 0xff,
    }
}

impl PixelAdapter for Bgr565<'_> {
    type Color = Nrgba;
    const BYTES_PER_PIXEL: usize = 2;

    fn bounds(&self) -> Rect {
        self.rect
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn get(&self, x: i32, y: i32) -> Nrgba {
        match pixel_range(&self.rect, self.stride, 2, self.pix.len(), x, y) {
            Some(r) => unpack([self.pix[r.start], self.pix[r.start + 1]]),
            None => Nrgba::default(),
        }
    }

    fn set(&mut self, x: i32, y: i32, c: Nrgba) {
        if let Some(r) = pixel_range(&self.rect, self.stride, 2, self.pix.len(), x, y) {
            self.pix[r].copy_from_slice(&pack(c));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_all_565_triples() {
        for r5 in 0u8..32 {
            for g6 in 0u8..64 {
                for b5 in 0u8..32 {
                    let c = Nrgba {
                        r: r5 << 3,
                        g: g6 << 2,
                        b: b5 << 3,
                        a: 0xff,
                    };
                    assert_eq!(unpack(pack(c)), c);
                }
            }
        }
    }

    #[test]
    fn known_encodings() {
        let red = Nrgba {
            r: 0xff,
            g: 0,
            b: 0,
            a: 0xff,
        };
        assert_eq!(pack(red), [0x00, 0xf8]);
        let green = Nrgba {
            r: 0,
            g: 0xff,
            b: 0,
            a: 0xff,
        };
        assert_eq!(pack(green), [0xe0, 0x07]);
        let blue = Nrgba {
            r: 0,
            g: 0,
            b: 0xff,
            a: 0xff,
        };
        assert_eq!(pack(blue), [0x1f, 0x00]);
    }

    #[test]
    fn set_then_get_uses_stride() {
        // 3x2 visible, but 4 pixels per scanline.
        let mut buf = vec![0u8; 4 * 2 * 2];
        let mut img = Bgr565::new(&mut buf, 8, Rect::with_size(3, 2));
        let c = Nrgba {
            r: 0xf8,
            g: 0xfc,
            b: 0xf8,
            a: 0xff,
        };
        img.set(2, 1, c);
        assert_eq!(img.pixel_offset(2, 1), Some(12));
        assert_eq!(img.get(2, 1), c);
        assert_eq!(&buf[12..14], &[0xff, 0xff]);
    }

    #[test]
    fn out_of_bounds_get_is_transparent() {
        let mut buf = vec![0xffu8; 8];
        let img = Bgr565::new(&mut buf, 4, Rect::with_size(2, 2));
        assert_eq!(img.get(2, 0), Nrgba::default());
        assert_eq!(img.get(-1, 0), Nrgba::default());
    }

    proptest! {
        #[test]
        fn prop_out_of_bounds_set_never_writes(
            w in 1i32..16, h in 1i32..16, pad in 0usize..8,
            x in -40i32..40, y in -40i32..40,
        ) {
            let stride = w as usize * 2 + pad;
            let mut buf = vec![0u8; stride * h as usize];
            let rect = Rect::with_size(w, h);
            let mut img = Bgr565::new(&mut buf, stride, rect);
            let white = Nrgba {
                r: 0xff,
                g: 0xff,
                b: 0xff,
                a: 0xff,
            };
            img.set(x, y, white);
            let got = img.get(x, y);
            if rect.contains(x, y) {
                prop_assert_eq!(got, Nrgba {
                    r: 0xf8,
                    g: 0xfc,
                    b: 0xf8,
                    a: 0xff,
                });
            } else {
                prop_assert_eq!(got, Nrgba::default());
                prop_assert!(buf.iter().all(|&b| b == 0));
            }
        }
    }
}
