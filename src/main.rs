//! fbstatus
//!
//! Shows the system status on the Linux framebuffer of display-less
//! appliances. Leases a virtual console in graphics mode, redraws once per
//! tick while the console is visible and restores the console on exit.

mod config;
mod console;
mod fb;
mod fbimage;
mod metrics;
mod platform;
mod render;
mod shutdown;

use anyhow::{bail, Context, Result};
use std::process;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use console::Lease;
use platform::Host;
use render::StatusDrawer;
use shutdown::Shutdown;

/// Main entry point
fn main() {
    // Initialize logging to stdout/stderr
    tracing_subscriber::fmt::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    info!("fbstatus starting...");

    match run() {
        Ok(()) => {
            info!("fbstatus exiting cleanly");
            process::exit(0);
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("\nFATAL ERROR: {:#}", e);
            process::exit(1);
        }
    }
}

fn run() -> Result<()> {
    // Must happen before any thread is spawned.
    shutdown::block_signals().context("Failed to block signals")?;

    let config = Config::from_env().context("Failed to read configuration")?;
    info!("Configuration: {:?}", config);

    let lease = Lease::acquire().context("Failed to lease a virtual console")?;
    info!(
        "Showing status on tty{}, returning to tty{} on exit",
        lease.vt(),
        lease.previous_vt()
    );
    let result = show_status(&config, &lease);

    info!("Cleaning up...");
    if let Err(e) = lease.cleanup() {
        warn!("{e}");
    }
    result
}

/// Everything that needs the leased console; returns when asked to exit.
fn show_status(config: &Config, lease: &Lease) -> Result<()> {
    let shutdown =
        Shutdown::install(lease.waker()).context("Failed to install shutdown handler")?;

    let mut device = fb::Device::open(&config.fb_device)
        .with_context(|| format!("Failed to open {}", config.fb_device.display()))?;
    let result = render_loop(config, lease, &shutdown, &mut device);
    if let Err(e) = device.close() {
        warn!("{e}");
    }
    result
}

fn render_loop(
    config: &Config,
    lease: &Lease,
    shutdown: &Shutdown,
    device: &mut fb::Device,
) -> Result<()> {
    let vinfo = device
        .var_screeninfo()
        .context("Failed to query framebuffer geometry")?;
    fb::log_screeninfo(device.fix_screeninfo(), &vinfo);
    let bounds = device
        .surface()
        .context("Failed to create framebuffer surface")?
        .bounds();

    let host = Host::new_default();
    let provider = metrics::default_modules(host.proc_root());
    let mut drawer = StatusDrawer::new(bounds, provider, host, config.scrollback)
        .context("Failed to set up status screen")?;

    info!("Entering main loop...");
    let mut deadline = Instant::now() + config.tick;
    loop {
        if shutdown.is_requested() {
            info!("Exit requested");
            return Ok(());
        }

        if lease.visible() {
            let mut surface = device
                .surface()
                .context("Failed to create framebuffer surface")?;
            drawer.draw(&mut surface).context("Failed to draw frame")?;
        }

        let wait = deadline.saturating_duration_since(Instant::now());
        match lease.redraw().recv_timeout(wait) {
            Ok(()) => debug!("Woken up early"),
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                deadline += config.tick;
                if deadline <= now {
                    deadline = now + config.tick;
                }
            }
            Err(RecvTimeoutError::Disconnected) => bail!("Console redraw channel closed"),
        }
    }
}
