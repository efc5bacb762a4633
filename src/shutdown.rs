//! Process signal handling
//!
//! All signals we care about are blocked process-wide before any thread is
//! spawned, then consumed by dedicated `sigwait` threads.

use nix::sys::signal::{SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use crate::console::handshake::{ACQUIRE_SIGNAL, RELEASE_SIGNAL};

/// Signals that ask us to exit.
pub fn shutdown_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set
}

/// Block shutdown and console switch signals in the calling thread.
///
/// Call from `main` before spawning threads, so every thread inherits the
/// mask and only the `sigwait` threads ever see these signals.
pub fn block_signals() -> nix::Result<()> {
    let mut set = shutdown_signals();
    set.add(RELEASE_SIGNAL);
    set.add(ACQUIRE_SIGNAL);
    set.thread_block()
}

/// Set once SIGINT or SIGTERM arrived.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    /// Start the thread that waits for SIGINT/SIGTERM.
    ///
    /// On arrival the flag is set and `wake` is poked so a loop blocked on
    /// the matching receiver returns right away.
    pub fn install(wake: SyncSender<()>) -> std::io::Result<Self> {
        let shutdown = Self::default();
        let handle = shutdown.clone();
        thread::Builder::new()
            .name("shutdown".into())
            .spawn(move || {
                let set = shutdown_signals();
                match set.wait() {
                    Ok(sig) => info!("Received {sig:?}, shutting down"),
                    Err(e) => warn!("sigwait: {e}, shutting down"),
                }
                handle.request(&wake);
            })?;
        Ok(shutdown)
    }

    pub fn request(&self, wake: &SyncSender<()>) {
        self.requested.store(true, Ordering::SeqCst);
        // A full slot already wakes the loop.
        let _ = wake.try_send(());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
