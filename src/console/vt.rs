//! Virtual terminal ioctls (`linux/vt.h`, `linux/kd.h`).

use nix::libc;
use nix::{ioctl_read_bad, ioctl_write_int_bad, ioctl_write_ptr_bad};
use std::os::fd::{AsRawFd, BorrowedFd};

const VT_OPENQRY: libc::c_int = 0x5600;
const VT_GETMODE: libc::c_int = 0x5601;
const VT_SETMODE: libc::c_int = 0x5602;
const VT_GETSTATE: libc::c_int = 0x5603;
const VT_RELDISP: libc::c_int = 0x5605;
const VT_ACTIVATE: libc::c_int = 0x5606;
const VT_WAITACTIVE: libc::c_int = 0x5607;
const VT_DISALLOCATE: libc::c_int = 0x5608;
const KDSETMODE: libc::c_int = 0x4B3A;

pub const VT_AUTO: i8 = 0x00;
pub const VT_PROCESS: i8 = 0x01;
/// `VT_RELDISP` argument acknowledging that we got the display back.
pub const VT_ACKACQ: libc::c_int = 0x02;

pub const KD_TEXT: libc::c_int = 0x00;
pub const KD_GRAPHICS: libc::c_int = 0x01;

/// `struct vt_stat`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VtState {
    pub v_active: u16,
    pub v_signal: u16,
    pub v_state: u16,
}

/// `struct vt_mode`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VtMode {
    pub mode: i8,
    pub waitv: i8,
    pub relsig: i16,
    pub acqsig: i16,
    pub frsig: i16,
}

ioctl_read_bad!(vt_openqry, VT_OPENQRY, libc::c_int);
ioctl_read_bad!(vt_getmode, VT_GETMODE, VtMode);
ioctl_write_ptr_bad!(vt_setmode, VT_SETMODE, VtMode);
ioctl_read_bad!(vt_getstate, VT_GETSTATE, VtState);
ioctl_write_int_bad!(vt_reldisp, VT_RELDISP);
ioctl_write_int_bad!(vt_activate, VT_ACTIVATE);
ioctl_write_int_bad!(vt_waitactive, VT_WAITACTIVE);
ioctl_write_int_bad!(vt_disallocate, VT_DISALLOCATE);
ioctl_write_int_bad!(kd_setmode, KDSETMODE);

// SAFETY (all wrappers below): each request is issued on a descriptor the
// caller keeps open for the duration of the call, with an argument of the
// exact type the kernel expects for that request.

/// First unused terminal number, or -1 when none is free.
pub fn open_query(fd: BorrowedFd<'_>) -> nix::Result<i32> {
    let mut free: libc::c_int = 0;
    unsafe { vt_openqry(fd.as_raw_fd(), &mut free) }?;
    Ok(free)
}

pub fn get_state(fd: BorrowedFd<'_>) -> nix::Result<VtState> {
    let mut state = VtState::default();
    unsafe { vt_getstate(fd.as_raw_fd(), &mut state) }?;
    Ok(state)
}

pub fn get_mode(fd: BorrowedFd<'_>) -> nix::Result<VtMode> {
    let mut mode = VtMode::default();
    unsafe { vt_getmode(fd.as_raw_fd(), &mut mode) }?;
    Ok(mode)
}

pub fn set_mode(fd: BorrowedFd<'_>, mode: &VtMode) -> nix::Result<()> {
    unsafe { vt_setmode(fd.as_raw_fd(), mode) }.map(drop)
}

pub fn activate(fd: BorrowedFd<'_>, vt: i32) -> nix::Result<()> {
    unsafe { vt_activate(fd.as_raw_fd(), vt) }.map(drop)
}

/// Blocks until `vt` is the active terminal.
pub fn wait_active(fd: BorrowedFd<'_>, vt: i32) -> nix::Result<()> {
    unsafe { vt_waitactive(fd.as_raw_fd(), vt) }.map(drop)
}

pub fn disallocate(fd: BorrowedFd<'_>, vt: i32) -> nix::Result<()> {
    unsafe { vt_disallocate(fd.as_raw_fd(), vt) }.map(drop)
}

/// Answer a pending switch request: `1` releases the display,
/// [`VT_ACKACQ`] acknowledges reacquiring it.
pub fn release_display(fd: BorrowedFd<'_>, arg: libc::c_int) -> nix::Result<()> {
    unsafe { vt_reldisp(fd.as_raw_fd(), arg) }.map(drop)
}

pub fn set_kd_mode(fd: BorrowedFd<'_>, mode: libc::c_int) -> nix::Result<()> {
    unsafe { kd_setmode(fd.as_raw_fd(), mode) }.map(drop)
}
