//! Linux console lease for graphics mode
//!
//! Leasing takes the next free virtual terminal, switches to it and puts it
//! in graphics mode so the kernel stops drawing its text console over the
//! framebuffer. Console switches by the user are negotiated through the
//! handshake in [`handshake`].
//!
//! Modeled after psplash's linuxvt support.

pub mod handshake;
pub mod vt;

use std::fmt;
use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use handshake::{switch_signals, Dispatcher, SwitchState, ACQUIRE_SIGNAL, RELEASE_SIGNAL};

/// Terminal used for allocation queries
const TTY_CONTROL: &str = "/dev/tty0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStep {
    QueryFree,
    OpenTerminal,
    GetState,
    Activate,
    WaitActive,
    InstallHandshake,
    SetGraphicsMode,
}

impl fmt::Display for AcquireStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AcquireStep::QueryFree => "VT_OPENQRY",
            AcquireStep::OpenTerminal => "open terminal",
            AcquireStep::GetState => "VT_GETSTATE",
            AcquireStep::Activate => "VT_ACTIVATE",
            AcquireStep::WaitActive => "VT_WAITACTIVE",
            AcquireStep::InstallHandshake => "VT_SETMODE (process)",
            AcquireStep::SetGraphicsMode => "KDSETMODE (graphics)",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    SetTextMode,
    UninstallHandshake,
    ActivatePrevious,
    WaitPrevious,
    StopHandshake,
    CloseTerminal,
    Deallocate,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanupStep::SetTextMode => "KDSETMODE (text)",
            CleanupStep::UninstallHandshake => "VT_SETMODE (auto)",
            CleanupStep::ActivatePrevious => "VT_ACTIVATE (previous)",
            CleanupStep::WaitPrevious => "VT_WAITACTIVE (previous)",
            CleanupStep::StopHandshake => "stop handshake thread",
            CleanupStep::CloseTerminal => "close terminal",
            CleanupStep::Deallocate => "VT_DISALLOCATE",
        })
    }
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("no free virtual terminal")]
    NoFreeTerminal,

    #[error("lease console: {step}: {source}")]
    Acquire {
        step: AcquireStep,
        #[source]
        source: std::io::Error,
    },

    #[error("release console: {step}: {source}")]
    Cleanup {
        step: CleanupStep,
        #[source]
        source: std::io::Error,
    },
}

fn acquire_err<E: Into<std::io::Error>>(step: AcquireStep) -> impl FnOnce(E) -> LeaseError {
    move |e| LeaseError::Acquire {
        step,
        source: e.into(),
    }
}

/// Exclusive ownership of one virtual terminal in graphics mode.
///
/// Call [`Lease::cleanup`] before exiting to restore text mode and switch
/// back to the previous terminal. A lease dropped without cleanup runs the
/// same teardown and logs its outcome.
pub struct Lease {
    vt: i32,
    prev_vt: i32,
    state: Arc<SwitchState>,
    redraw: Receiver<()>,
    tty: Option<OwnedFd>,
    dispatcher: Option<Dispatcher>,
}

impl Lease {
    /// Open the next free console and switch it into graphics mode.
    pub fn acquire() -> Result<Self, LeaseError> {
        let free = next_free_console()?;
        info!("Opening next free console /dev/tty{free}");

        let path = format!("/dev/tty{free}");
        let tty: OwnedFd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(acquire_err(AcquireStep::OpenTerminal))?
            .into();

        let switched = vt::get_state(tty.as_fd())
            .map_err(acquire_err(AcquireStep::GetState))
            .and_then(|state| {
                vt::activate(tty.as_fd(), free).map_err(acquire_err(AcquireStep::Activate))?;
                vt::wait_active(tty.as_fd(), free)
                    .map_err(acquire_err(AcquireStep::WaitActive))?;
                Ok(state)
            });
        let state = match switched {
            Ok(state) => state,
            Err(e) => {
                warn!("{path} may stay allocated until reboot");
                return Err(e);
            }
        };

        let (tx, rx) = sync_channel(1);
        let mut lease = Lease {
            vt: free,
            prev_vt: i32::from(state.v_active),
            state: Arc::new(SwitchState::new(tx)),
            redraw: rx,
            tty: Some(tty),
            dispatcher: None,
        };
        let entered = lease
            .install_handshake()
            .and_then(|()| lease.set_kd_mode(vt::KD_GRAPHICS));
        if let Err(e) = entered {
            warn!("Rolling back lease of /dev/tty{free}");
            if let Err(undo) = lease.teardown() {
                warn!("Rollback incomplete: {undo}");
            }
            return Err(e);
        }
        info!(
            "Console /dev/tty{} in graphics mode (previous: tty{})",
            lease.vt, lease.prev_vt
        );
        Ok(lease)
    }

    fn tty(&self) -> Result<&OwnedFd, std::io::Error> {
        self.tty
            .as_ref()
            .ok_or_else(|| std::io::Error::from(nix::errno::Errno::EBADF))
    }

    fn install_handshake(&mut self) -> Result<(), LeaseError> {
        let step = AcquireStep::InstallHandshake;
        switch_signals().thread_block().map_err(acquire_err(step))?;

        let tty = self.tty().map_err(acquire_err(step))?;
        let mut mode = vt::get_mode(tty.as_fd()).map_err(acquire_err(step))?;
        let raw = tty.as_raw_fd();
        self.dispatcher =
            Some(Dispatcher::spawn(raw, Arc::clone(&self.state)).map_err(acquire_err(step))?);

        mode.mode = vt::VT_PROCESS;
        mode.relsig = RELEASE_SIGNAL as i16;
        mode.acqsig = ACQUIRE_SIGNAL as i16;
        self.state.set_visible(true);

        let tty = self.tty().map_err(acquire_err(step))?;
        vt::set_mode(tty.as_fd(), &mode).map_err(acquire_err(step))
    }

    fn set_kd_mode(&self, mode: i32) -> Result<(), LeaseError> {
        let tty = self.tty().map_err(acquire_err(AcquireStep::SetGraphicsMode))?;
        vt::set_kd_mode(tty.as_fd(), mode).map_err(acquire_err(AcquireStep::SetGraphicsMode))
    }

    /// Whether this console is currently shown. May change right after
    /// the call returns.
    pub fn visible(&self) -> bool {
        self.state.visible()
    }

    /// Signalled when the user switched back to this console and the
    /// framebuffer needs a full redraw.
    pub fn redraw(&self) -> &Receiver<()> {
        &self.redraw
    }

    /// A sender into the redraw channel, for waking the render loop.
    pub fn waker(&self) -> SyncSender<()> {
        self.state.redraw_sender()
    }

    pub fn vt(&self) -> i32 {
        self.vt
    }

    pub fn previous_vt(&self) -> i32 {
        self.prev_vt
    }

    /// Switch back to text mode and the previous console, then deallocate
    /// the leased one.
    ///
    /// Every step is attempted; the first failure is returned.
    pub fn cleanup(mut self) -> Result<(), LeaseError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), LeaseError> {
        let Some(tty) = self.tty.take() else {
            return Ok(());
        };
        // Swap in a receiver whose sender is gone.
        self.redraw = sync_channel(0).1;

        let mut terminal = Terminal {
            tty: Some(tty),
            dispatcher: self.dispatcher.take(),
            leak_tty: false,
        };
        release_console(&mut terminal, self.vt, self.prev_vt)?;
        info!("Console /dev/tty{} released", self.vt);
        Ok(())
    }
}

/// Console calls made while releasing a lease.
trait Release {
    fn set_text_mode(&mut self) -> nix::Result<()>;
    fn unhandle_switches(&mut self) -> nix::Result<()>;
    fn activate(&mut self, num: i32) -> nix::Result<()>;
    fn wait_active(&mut self, num: i32) -> nix::Result<()>;
    fn stop_handshake(&mut self) -> nix::Result<()>;
    fn close(&mut self) -> nix::Result<()>;
    fn deallocate(&mut self, num: i32) -> std::io::Result<()>;
}

/// Run every release step against `console`; the first failure is returned.
///
/// The handshake thread keeps answering until the previous console is
/// active, so a terminal left in process mode still gets its release
/// acknowledged.
fn release_console(console: &mut impl Release, vt: i32, prev_vt: i32) -> Result<(), LeaseError> {
    let mut failures = Failures::default();

    failures.note(CleanupStep::SetTextMode, console.set_text_mode());
    failures.note(CleanupStep::UninstallHandshake, console.unhandle_switches());

    let activated = console.activate(prev_vt);
    let ok = activated.is_ok();
    failures.note(CleanupStep::ActivatePrevious, activated);
    if ok {
        failures.note(CleanupStep::WaitPrevious, console.wait_active(prev_vt));
    }

    failures.note(CleanupStep::StopHandshake, console.stop_handshake());
    failures.note(CleanupStep::CloseTerminal, console.close());
    if let Err(e) = console.deallocate(vt) {
        failures.note_io(CleanupStep::Deallocate, e);
    }

    match failures.first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// The leased terminal as seen by [`release_console`].
struct Terminal {
    tty: Option<OwnedFd>,
    dispatcher: Option<Dispatcher>,
    leak_tty: bool,
}

impl Terminal {
    fn fd(&self) -> nix::Result<BorrowedFd<'_>> {
        self.tty
            .as_ref()
            .map(|tty| tty.as_fd())
            .ok_or(nix::errno::Errno::EBADF)
    }
}

impl Release for Terminal {
    fn set_text_mode(&mut self) -> nix::Result<()> {
        vt::set_kd_mode(self.fd()?, vt::KD_TEXT)
    }

    fn unhandle_switches(&mut self) -> nix::Result<()> {
        let fd = self.fd()?;
        let mut mode = vt::get_mode(fd)?;
        mode.mode = vt::VT_AUTO;
        mode.relsig = 0;
        mode.acqsig = 0;
        vt::set_mode(fd, &mode)
    }

    fn activate(&mut self, num: i32) -> nix::Result<()> {
        vt::activate(self.fd()?, num)
    }

    fn wait_active(&mut self, num: i32) -> nix::Result<()> {
        vt::wait_active(self.fd()?, num)
    }

    fn stop_handshake(&mut self) -> nix::Result<()> {
        let Some(dispatcher) = self.dispatcher.take() else {
            return Ok(());
        };
        let stopped = dispatcher.stop();
        // A thread that could not be stopped still reads the descriptor.
        self.leak_tty = stopped.is_err();
        stopped
    }

    fn close(&mut self) -> nix::Result<()> {
        let Some(tty) = self.tty.take() else {
            return Ok(());
        };
        let raw = tty.into_raw_fd();
        if self.leak_tty {
            warn!("Leaving terminal descriptor {raw} open for the handshake thread");
            return Ok(());
        }
        nix::unistd::close(raw)
    }

    fn deallocate(&mut self, num: i32) -> std::io::Result<()> {
        disallocate_console(num)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.tty.is_none() {
            return;
        }
        warn!("Console lease dropped without cleanup()");
        if let Err(e) = self.teardown() {
            warn!("Console cleanup failed: {e}");
        }
    }
}

/// First cleanup failure wins; every failure gets logged.
#[derive(Default)]
struct Failures {
    first: Option<LeaseError>,
}

impl Failures {
    fn note(&mut self, step: CleanupStep, res: nix::Result<()>) {
        if let Err(e) = res {
            self.note_io(step, e.into());
        }
    }

    fn note_io(&mut self, step: CleanupStep, source: std::io::Error) {
        warn!("Console cleanup: {step}: {source}");
        self.first
            .get_or_insert(LeaseError::Cleanup { step, source });
    }
}

fn next_free_console() -> Result<i32, LeaseError> {
    let f = OpenOptions::new()
        .write(true)
        .open(TTY_CONTROL)
        .map_err(acquire_err(AcquireStep::QueryFree))?;
    let free = vt::open_query(f.as_fd()).map_err(acquire_err(AcquireStep::QueryFree))?;
    if free < 1 {
        return Err(LeaseError::NoFreeTerminal);
    }
    Ok(free)
}

fn disallocate_console(num: i32) -> std::io::Result<()> {
    let f = OpenOptions::new().write(true).open(TTY_CONTROL)?;
    vt::disallocate(f.as_fd(), num)?;
    nix::unistd::close(f.into_raw_fd())?;
    Ok(())
}
