//! Console switch handshake
//!
//! With the terminal in `VT_PROCESS` mode the kernel asks before switching
//! away (`SIGUSR1`) and tells us when we are switched back to (`SIGUSR2`).
//! Both signals are consumed by a dedicated `sigwait` thread, which only
//! touches [`SwitchState`] and the terminal descriptor it acknowledges on.

use nix::sys::pthread::pthread_kill;
use nix::sys::signal::{SigSet, Signal};
use std::os::fd::{BorrowedFd, RawFd};
use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::vt;

pub const RELEASE_SIGNAL: Signal = Signal::SIGUSR1;
pub const ACQUIRE_SIGNAL: Signal = Signal::SIGUSR2;

/// State shared between the render loop and the handshake thread.
pub struct SwitchState {
    visible: Mutex<bool>,
    redraw: SyncSender<()>,
}

impl SwitchState {
    pub fn new(redraw: SyncSender<()>) -> Self {
        Self {
            visible: Mutex::new(false),
            redraw,
        }
    }

    pub fn visible(&self) -> bool {
        *self.visible.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_visible(&self, visible: bool) {
        *self.visible.lock().unwrap_or_else(PoisonError::into_inner) = visible;
    }

    pub fn redraw_sender(&self) -> SyncSender<()> {
        self.redraw.clone()
    }

    /// The kernel wants to switch away: stop drawing, then let it.
    pub fn release_requested(&self, ack: impl FnOnce() -> nix::Result<()>) {
        info!("Switched to a different VT, no longer visible");
        self.set_visible(false);
        if let Err(e) = ack() {
            warn!("VT_RELDISP (release): {e}");
        }
    }

    /// We are the active terminal again: resume drawing and request a
    /// redraw. Pending redraws coalesce into one.
    pub fn acquired(&self, ack: impl FnOnce() -> nix::Result<()>) {
        info!("Switched back, now visible");
        self.set_visible(true);
        if let Err(e) = ack() {
            warn!("VT_RELDISP (acquire): {e}");
        }
        match self.redraw.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("Redraw already pending"),
            Err(TrySendError::Disconnected(())) => debug!("Redraw channel closed"),
        }
    }
}

/// The `sigwait` thread answering switch requests for one terminal.
pub struct Dispatcher {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// The switch signals in a set, for blocking and waiting.
pub fn switch_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(RELEASE_SIGNAL);
    set.add(ACQUIRE_SIGNAL);
    set
}

impl Dispatcher {
    /// Start answering switch signals on `tty`.
    ///
    /// The caller must keep `tty` open until [`Dispatcher::stop`] returns.
    /// The switch signals must already be blocked in every thread, or the
    /// default action (terminate) may run instead.
    pub fn spawn(tty: RawFd, state: Arc<SwitchState>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("vt-handshake".into())
            .spawn(move || dispatch(tty, &state, &stop_flag))?;
        Ok(Self { handle, stop })
    }

    /// Stop the thread and wait for it to exit.
    ///
    /// On error the thread is left running, detached, and the terminal
    /// descriptor it was given must stay open.
    pub fn stop(self) -> nix::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the sigwait; the stop flag makes the thread ignore the signal.
        if let Err(e) = pthread_kill(self.handle.as_pthread_t(), ACQUIRE_SIGNAL) {
            warn!("Could not wake VT handshake thread ({e}), leaving it running");
            return Err(e);
        }
        if self.handle.join().is_err() {
            warn!("VT handshake thread panicked");
        }
        Ok(())
    }
}

fn dispatch(tty: RawFd, state: &SwitchState, stop: &AtomicBool) {
    // SAFETY: the lease keeps the descriptor open until after it has joined
    // this thread.
    let fd = unsafe { BorrowedFd::borrow_raw(tty) };
    let set = switch_signals();
    debug!("VT handshake thread started");
    loop {
        let sig = match set.wait() {
            Ok(sig) => sig,
            Err(e) => {
                warn!("sigwait: {e}");
                continue;
            }
        };
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match sig {
            RELEASE_SIGNAL => state.release_requested(|| vt::release_display(fd, 1)),
            ACQUIRE_SIGNAL => {
                state.acquired(|| vt::release_display(fd, vt::VT_ACKACQ))
            }
            other => debug!("Ignoring {other:?}"),
        }
    }
    debug!("VT handshake thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn release_hides_and_acknowledges() {
        let (tx, _rx) = sync_channel(1);
        let state = SwitchState::new(tx);
        state.set_visible(true);
        let mut acked = false;
        state.release_requested(|| {
            acked = true;
            Ok(())
        });
        assert!(acked);
        assert!(!state.visible());
    }

    #[test]
    fn acquire_coalesces_redraws() {
        let (tx, rx) = sync_channel(1);
        let state = SwitchState::new(tx);
        state.acquired(|| Ok(()));
        state.acquired(|| Ok(()));
        assert!(state.visible());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_ack_still_flips_visibility() {
        let (tx, rx) = sync_channel(1);
        let state = SwitchState::new(tx);
        state.acquired(|| Err(nix::errno::Errno::ENOTTY));
        assert!(state.visible());
        assert!(rx.try_recv().is_ok());
        state.release_requested(|| Err(nix::errno::Errno::ENOTTY));
        assert!(!state.visible());
    }

    #[test]
    fn acquire_after_receiver_dropped_is_harmless() {
        let (tx, rx) = sync_channel(1);
        let state = SwitchState::new(tx);
        drop(rx);
        state.acquired(|| Ok(()));
        assert!(state.visible());
    }
}
