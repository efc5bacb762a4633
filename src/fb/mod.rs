//! Linux framebuffer device access via ioctls and mmap

pub mod screeninfo;

use nix::errno::Errno;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fbimage::{Bgr565, Bgra, Gray16Image, Rect, Surface};

pub use screeninfo::{FixScreeninfo, VarScreeninfo};

/// Default framebuffer device node
pub const FB_DEVICE: &str = "/dev/fb0";

#[derive(Debug, Error)]
pub enum FbError {
    #[error("open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{request}: {source}")]
    GeometryQuery {
        request: &'static str,
        #[source]
        source: Errno,
    },

    #[error("mmap of {len} bytes: {source}")]
    Map {
        len: usize,
        #[source]
        source: Errno,
    },

    #[error("framebuffer geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("{0} bits per pixel unsupported")]
    UnsupportedFormat(u32),

    #[error("munmap: {0}")]
    Unmap(#[source] Errno),

    #[error("close: {close}{}", unmap.map(|e| format!(" (munmap also failed: {e})")).unwrap_or_default())]
    Close { close: Errno, unmap: Option<Errno> },
}

/// Shared mapping of the device memory.
struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Mapping {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe a live MAP_SHARED region that only this
        // Mapping references; the returned borrow is tied to &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }

    fn unmap(self) -> nix::Result<()> {
        // SAFETY: the region was returned by mmap with this length and no
        // slice into it outlives the Mapping.
        unsafe { munmap(self.ptr, self.len) }
    }
}

/// An open framebuffer device with its memory mapped into the process.
///
/// Call [`Device::close`] to release it and observe failures. Dropping an
/// unclosed device releases it too, but can only log what went wrong.
pub struct Device {
    fd: Option<OwnedFd>,
    map: Option<Mapping>,
    finfo: FixScreeninfo,
}

impl Device {
    /// Open `path`, read its fixed geometry and map its memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FbError> {
        let path = path.as_ref();
        // std opens with O_CLOEXEC.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| FbError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let fd: OwnedFd = file.into();

        let mut finfo = FixScreeninfo::default();
        // SAFETY: finfo is a repr(C) mirror of struct fb_fix_screeninfo.
        unsafe { screeninfo::fbioget_fscreeninfo(fd.as_raw_fd(), &mut finfo) }.map_err(
            |source| FbError::GeometryQuery {
                request: "FBIOGET_FSCREENINFO",
                source,
            },
        )?;

        let len = finfo.smem_len as usize;
        let length = NonZeroUsize::new(len).ok_or(FbError::Map {
            len,
            source: Errno::EINVAL,
        })?;
        // SAFETY: a fresh shared mapping of the device; no Rust object
        // aliases it yet.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(|source| FbError::Map { len, source })?;

        info!(
            "Framebuffer {} opened: id={:?} smem_len={} line_length={}",
            path.display(),
            finfo.id(),
            finfo.smem_len,
            finfo.line_length
        );

        Ok(Self {
            fd: Some(fd),
            map: Some(Mapping { ptr, len }),
            finfo,
        })
    }

    pub fn fix_screeninfo(&self) -> &FixScreeninfo {
        &self.finfo
    }

    /// Query the current variable geometry. Never cached.
    pub fn var_screeninfo(&self) -> Result<VarScreeninfo, FbError> {
        let fd = self.fd.as_ref().ok_or(FbError::GeometryQuery {
            request: "FBIOGET_VSCREENINFO",
            source: Errno::EBADF,
        })?;
        let mut vinfo = VarScreeninfo::default();
        // SAFETY: vinfo is a repr(C) mirror of struct fb_var_screeninfo.
        unsafe { screeninfo::fbioget_vscreeninfo(fd.as_raw_fd(), &mut vinfo) }.map_err(
            |source| FbError::GeometryQuery {
                request: "FBIOGET_VSCREENINFO",
                source,
            },
        )?;
        Ok(vinfo)
    }

    /// A pixel surface over the visible part of the mapped memory.
    pub fn surface(&mut self) -> Result<Surface<'_>, FbError> {
        let vinfo = self.var_screeninfo()?;
        let finfo = self.finfo;
        let map = self.map.as_mut().ok_or(FbError::Map {
            len: 0,
            source: Errno::EBADF,
        })?;
        surface_from(map.as_mut_slice(), &finfo, &vinfo)
    }

    /// Unmap the memory, then close the descriptor.
    ///
    /// A close failure takes priority over an unmap failure; both are
    /// reported in [`FbError::Close`].
    pub fn close(mut self) -> Result<(), FbError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), FbError> {
        let unmap = match self.map.take() {
            Some(map) => map.unmap().err(),
            None => None,
        };
        let close = match self.fd.take() {
            Some(fd) => nix::unistd::close(fd.into_raw_fd()).err(),
            None => None,
        };
        release_outcome(close, unmap)?;
        debug!("Framebuffer released");
        Ok(())
    }
}

fn release_outcome(close: Option<Errno>, unmap: Option<Errno>) -> Result<(), FbError> {
    match (close, unmap) {
        (Some(close), unmap) => Err(FbError::Close { close, unmap }),
        (None, Some(e)) => Err(FbError::Unmap(e)),
        (None, None) => Ok(()),
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.fd.is_none() && self.map.is_none() {
            return;
        }
        warn!("Framebuffer device dropped without close()");
        if let Err(e) = self.release() {
            warn!("Framebuffer release failed: {e}");
        }
    }
}

/// Validate `vinfo` against the mapped buffer and build the matching surface.
///
/// The returned surface starts at the pan origin of the visible area, so
/// its pixel offsets are relative to `(xoffset, yoffset)`.
pub fn surface_from<'a>(
    buf: &'a mut [u8],
    finfo: &FixScreeninfo,
    vinfo: &VarScreeninfo,
) -> Result<Surface<'a>, FbError> {
    let bpp: usize = match vinfo.bits_per_pixel {
        32 => 4,
        16 => 2,
        other => return Err(FbError::UnsupportedFormat(other)),
    };

    let virtual_rect = Rect::with_size(to_i32(vinfo.xres_virtual)?, to_i32(vinfo.yres_virtual)?);
    let (xoff, yoff) = (to_i32(vinfo.xoffset)?, to_i32(vinfo.yoffset)?);
    let visible = Rect::new(
        xoff,
        yoff,
        xoff.saturating_add(to_i32(vinfo.xres)?),
        yoff.saturating_add(to_i32(vinfo.yres)?),
    );

    let expected = (vinfo.xres_virtual as u64)
        .saturating_mul(vinfo.yres_virtual as u64)
        .saturating_mul(bpp as u64);
    if expected != buf.len() as u64 {
        return Err(FbError::GeometryMismatch(format!(
            "virtual resolution {}x{} at {} bpp needs {} bytes, framebuffer maps {}",
            vinfo.xres_virtual,
            vinfo.yres_virtual,
            vinfo.bits_per_pixel,
            expected,
            buf.len()
        )));
    }
    if !visible.is_within(&virtual_rect) {
        return Err(FbError::GeometryMismatch(format!(
            "visible area {visible} not contained in virtual area {virtual_rect}"
        )));
    }

    let stride = finfo.line_length as usize;
    if stride < vinfo.xres_virtual as usize * bpp {
        return Err(FbError::GeometryMismatch(format!(
            "line length {stride} shorter than {} pixels at {bpp} bytes",
            vinfo.xres_virtual
        )));
    }

    let origin = yoff as usize * stride + xoff as usize * bpp;
    let pix = buf.get_mut(origin..).ok_or_else(|| {
        FbError::GeometryMismatch(format!("pan origin {origin} past end of framebuffer"))
    })?;

    Ok(match (bpp, vinfo.grayscale != 0) {
        (4, _) => Surface::Bgra(Bgra::new(pix, stride, visible)),
        (_, true) => Surface::Gray16(Gray16Image::new(pix, stride, visible)),
        (_, false) => Surface::Bgr565(Bgr565::new(pix, stride, visible)),
    })
}

fn to_i32(v: u32) -> Result<i32, FbError> {
    i32::try_from(v)
        .map_err(|_| FbError::GeometryMismatch(format!("dimension {v} out of range")))
}

/// Log the full geometry; useful when bringing up a new board.
pub fn log_screeninfo(finfo: &FixScreeninfo, vinfo: &VarScreeninfo) {
    info!(
        "Framebuffer screeninfo: type={} visual={} line_length={}",
        finfo.type_, finfo.visual, finfo.line_length
    );
    info!(
        "Framebuffer screeninfo: {}x{} (virtual {}x{}, offset {},{}) @ {} bpp, grayscale={} red={:?} green={:?} blue={:?}",
        vinfo.xres,
        vinfo.yres,
        vinfo.xres_virtual,
        vinfo.yres_virtual,
        vinfo.xoffset,
        vinfo.yoffset,
        vinfo.bits_per_pixel,
        vinfo.grayscale,
        vinfo.red,
        vinfo.green,
        vinfo.blue
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(w: u32, h: u32, bpp: u32) -> (FixScreeninfo, VarScreeninfo) {
        let finfo = FixScreeninfo {
            smem_len: w * h * bpp / 8,
            line_length: w * bpp / 8,
            ..FixScreeninfo::default()
        };
        let vinfo = VarScreeninfo {
            xres: w,
            yres: h,
            xres_virtual: w,
            yres_virtual: h,
            bits_per_pixel: bpp,
            ..VarScreeninfo::default()
        };
        (finfo, vinfo)
    }

    #[test]
    fn packed_16bpp_end_to_end() {
        let (finfo, vinfo) = geometry(800, 600, 16);
        let mut buf = vec![0u8; 800 * 600 * 2];
        let surface = surface_from(&mut buf, &finfo, &vinfo).unwrap();
        assert!(matches!(surface, Surface::Bgr565(_)));
        assert_eq!(surface.bounds(), Rect::with_size(800, 600));
        assert_eq!(surface.pixel_offset(10, 5), Some(5 * (800 * 2) + 10 * 2));
    }

    #[test]
    fn format_dispatch() {
        let (finfo, vinfo) = geometry(4, 4, 32);
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            surface_from(&mut buf, &finfo, &vinfo).unwrap(),
            Surface::Bgra(_)
        ));

        let (finfo, mut vinfo) = geometry(4, 4, 16);
        let mut buf = vec![0u8; 32];
        vinfo.grayscale = 1;
        assert!(matches!(
            surface_from(&mut buf, &finfo, &vinfo).unwrap(),
            Surface::Gray16(_)
        ));
        vinfo.grayscale = 0;
        assert!(matches!(
            surface_from(&mut buf, &finfo, &vinfo).unwrap(),
            Surface::Bgr565(_)
        ));

        for bpp in [8, 24] {
            let (finfo, vinfo) = geometry(4, 4, bpp);
            let mut buf = vec![0u8; (4 * 4 * bpp / 8) as usize];
            let err = surface_from(&mut buf, &finfo, &vinfo).unwrap_err();
            assert!(matches!(err, FbError::UnsupportedFormat(b) if b == bpp));
            assert!(err.to_string().contains(&bpp.to_string()));
        }
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let (finfo, vinfo) = geometry(800, 600, 16);
        // Stale geometry: the driver reports 800x600 but maps less.
        let mut buf = vec![0u8; 640 * 480 * 2];
        let err = surface_from(&mut buf, &finfo, &vinfo).unwrap_err();
        assert!(matches!(err, FbError::GeometryMismatch(_)), "{err}");
    }

    #[test]
    fn visible_outside_virtual_is_rejected() {
        let (finfo, mut vinfo) = geometry(800, 600, 32);
        vinfo.xoffset = 100;
        let mut buf = vec![0u8; 800 * 600 * 4];
        let err = surface_from(&mut buf, &finfo, &vinfo).unwrap_err();
        assert!(matches!(err, FbError::GeometryMismatch(_)), "{err}");
    }

    #[test]
    fn panned_surface_starts_at_offset() {
        // 8x8 virtual, 4x4 visible at (2,3).
        let (finfo, mut vinfo) = geometry(8, 8, 16);
        vinfo.xres = 4;
        vinfo.yres = 4;
        vinfo.xoffset = 2;
        vinfo.yoffset = 3;
        let mut buf = vec![0u8; 8 * 8 * 2];
        {
            let mut surface = surface_from(&mut buf, &finfo, &vinfo).unwrap();
            assert_eq!(surface.bounds(), Rect::new(2, 3, 6, 7));
            assert_eq!(surface.pixel_offset(2, 3), Some(0));
            surface.set_rgba(2, 3, crate::fbimage::Rgba::opaque(255, 255, 255));
        }
        let origin = 3 * 16 + 2 * 2;
        assert_eq!(&buf[origin..origin + 2], &[0xff, 0xff]);
        assert!(buf[..origin].iter().all(|&b| b == 0));
    }

    #[test]
    fn short_stride_is_rejected() {
        let (mut finfo, vinfo) = geometry(8, 8, 32);
        finfo.line_length = 16;
        let mut buf = vec![0u8; 8 * 8 * 4];
        assert!(matches!(
            surface_from(&mut buf, &finfo, &vinfo),
            Err(FbError::GeometryMismatch(_))
        ));
    }

    #[test]
    fn open_missing_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Device::open(dir.path().join("fb9")).err().unwrap();
        assert!(matches!(err, FbError::Open { .. }));
    }

    #[test]
    fn open_regular_file_fails_geometry_query() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = Device::open(file.path()).err().unwrap();
        assert!(matches!(err, FbError::GeometryQuery { .. }), "{err}");
    }

    fn null_fd() -> OwnedFd {
        std::fs::File::open("/dev/null").unwrap().into()
    }

    #[test]
    fn close_releases_mapping_and_descriptor() {
        let len = NonZeroUsize::new(4096).unwrap();
        let ptr = unsafe {
            nix::sys::mman::mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();
        let device = Device {
            fd: Some(null_fd()),
            map: Some(Mapping { ptr, len: 4096 }),
            finfo: FixScreeninfo::default(),
        };
        device.close().unwrap();
    }

    #[test]
    fn unmap_failure_still_closes() {
        // munmap rejects an unaligned address without touching memory.
        let mut device = Device {
            fd: Some(null_fd()),
            map: Some(Mapping {
                ptr: NonNull::new(1usize as *mut c_void).unwrap(),
                len: 4096,
            }),
            finfo: FixScreeninfo::default(),
        };
        let err = device.release().unwrap_err();
        assert!(matches!(err, FbError::Unmap(Errno::EINVAL)), "{err}");
        assert!(device.fd.is_none());
        assert!(device.map.is_none());
        // Nothing left for Drop to release.
        device.release().unwrap();
    }

    #[test]
    fn close_failure_wins_over_unmap() {
        let err = release_outcome(Some(Errno::EIO), Some(Errno::EINVAL)).unwrap_err();
        assert!(matches!(
            err,
            FbError::Close {
                close: Errno::EIO,
                unmap: Some(Errno::EINVAL)
            }
        ));
        let err = release_outcome(Some(Errno::EIO), None).unwrap_err();
        assert!(matches!(err, FbError::Close { unmap: None, .. }));
        assert!(matches!(
            release_outcome(None, Some(Errno::EINVAL)),
            Err(FbError::Unmap(Errno::EINVAL))
        ));
        assert!(release_outcome(None, None).is_ok());
    }

    #[test]
    fn close_error_mentions_unmap() {
        let err = FbError::Close {
            close: Errno::EIO,
            unmap: Some(Errno::EINVAL),
        };
        let msg = err.to_string();
        assert!(msg.contains("close"));
        assert!(msg.contains("munmap also failed"));
    }
}
