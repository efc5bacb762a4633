//! Canvas to framebuffer copy
//!
//! The generic per-pixel path converts through [`Surface::set_rgba`] and is
//! far too slow for a full frame on small boards, so the two common
//! encodings get row-wise loops.

use tracing::warn;

use super::canvas::Canvas;
use crate::fbimage::{bgr565, Bgr565, Bgra, PixelAdapter, Rect, Rgba, Surface};

/// Copy the overlapping part of `src` onto `dst`.
///
/// `slow_path_notified` is set after the first copy that used the generic
/// path, which logs a warning only that once.
pub fn copy_to_surface(dst: &mut Surface<'_>, src: &Canvas, slow_path_notified: &mut bool) {
    let area = dst.bounds().intersect(&src.bounds());
    if area.is_empty() {
        return;
    }
    match dst {
        Surface::Bgr565(d) => copy_bgr565(d, src, area),
        Surface::Bgra(d) => copy_bgra(d, src, area),
        other => {
            if !*slow_path_notified {
                warn!(
                    "Framebuffer not using BGR565 or BGRA, falling back to slow path for {}",
                    other.format_name()
                );
                *slow_path_notified = true;
            }
            copy_generic(other, src, area);
        }
    }
}

/// Source and destination byte rows of `area` at line `y`, if both fit.
fn rows<'s, 'd>(
    src: &'s Canvas,
    dst: &'d mut [u8],
    dst_offset: usize,
    dst_bpp: usize,
    area: Rect,
    y: i32,
) -> Option<(&'s [u8], &'d mut [u8])> {
    let w = area.width() as usize;
    let s = src.pixel_offset(area.min_x, y);
    let srow = src.pix().get(s..s + w * 4)?;
    let drow = dst.get_mut(dst_offset..dst_offset + w * dst_bpp)?;
    Some((srow, drow))
}

fn copy_bgr565(dst: &mut Bgr565<'_>, src: &Canvas, area: Rect) {
    for y in area.min_y..area.max_y {
        let Some(d) = dst.pixel_offset(area.min_x, y) else {
            continue;
        };
        let Some((srow, drow)) = rows(src, dst.pix, d, 2, area, y) else {
            continue;
        };
        for (s, d) in srow.chunks_exact(4).zip(drow.chunks_exact_mut(2)) {
            let c = Rgba::from_bytes([s[0], s[1], s[2], s[3]]).to_nrgba();
            d.copy_from_slice(&bgr565::pack(c));
        }
    }
}

fn copy_bgra(dst: &mut Bgra<'_>, src: &Canvas, area: Rect) {
    for y in area.min_y..area.max_y {
        let Some(d) = dst.pixel_offset(area.min_x, y) else {
            continue;
        };
        let Some((srow, drow)) = rows(src, dst.pix, d, 4, area, y) else {
            continue;
        };
        for (s, d) in srow.chunks_exact(4).zip(drow.chunks_exact_mut(4)) {
            d.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
        }
    }
}

fn copy_generic(dst: &mut Surface<'_>, src: &Canvas, area: Rect) {
    for y in area.min_y..area.max_y {
        for x in area.min_x..area.max_x {
            dst.set_rgba(x, y, src.get(x, y));
        }
    }
}
