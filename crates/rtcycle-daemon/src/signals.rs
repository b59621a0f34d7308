//! Signal-driven cancellation.
//!
//! SIGINT and SIGTERM only store the signal number in an atomic; a watcher
//! thread picks it up and triggers the shared [`CancelToken`]. Cancelling the
//! token interrupts every worker sleeping on it, so a worker blocked in its
//! absolute wait stops without running another cycle. Handlers are installed
//! without `SA_RESTART`.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use rtcycle_runtime::CancelToken;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Last signal delivered, 0 if none is pending.
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

extern "C" fn on_signal(signum: c_int) {
    PENDING_SIGNAL.store(signum, Ordering::Relaxed);
}

fn signal_name(signum: c_int) -> &'static str {
    match Signal::try_from(signum) {
        Ok(signal) => signal.as_str(),
        Err(_) => "unknown",
    }
}

/// Forwards SIGINT/SIGTERM to a [`CancelToken`] until dropped.
pub struct SignalWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    /// Install the handlers and start the watcher thread.
    pub fn install(cancel: CancelToken) -> std::io::Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only performs an atomic store.
            unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("rt-signals".into())
            .spawn(move || watch(&cancel, &thread_stop))?;

        debug!("SIGINT/SIGTERM handlers registered");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

fn watch(cancel: &CancelToken, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        let signum = PENDING_SIGNAL.swap(0, Ordering::Relaxed);
        if signum != 0 {
            info!(signal = signal_name(signum), "Cancellation requested");
            cancel.cancel();
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
