//! Signal handling for graceful daemon shutdown.
//!
//! SIGINT and SIGTERM set the reactor's quit flag straight from the handler.
//! The handler body is async-signal-safe: one `OnceLock` load plus one atomic
//! store. Handlers are registered without `SA_RESTART`, so a signal also
//! interrupts the reactor's absolute sleep and the loop observes the flag
//! immediately instead of at the next deadline.

use ivm_sched::reactor::QuitHandle;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

static QUIT: OnceLock<QuitHandle> = OnceLock::new();
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);

extern "C" fn handle_shutdown_signal(_: c_int) {
    SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
    if let Some(quit) = QUIT.get() {
        quit.quit();
    }
}

/// Register SIGINT and SIGTERM handlers that stop the given reactor.
///
/// May be called once per process; later calls fail.
///
/// # Errors
///
/// Returns an error if a handler is already installed or registration fails.
pub fn install(quit: QuitHandle) -> std::io::Result<()> {
    QUIT.set(quit).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "signal handlers already installed",
        )
    })?;

    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );

    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only touches atomics and an initialized OnceLock
        unsafe {
            sigaction(signal, &action).map_err(std::io::Error::from)?;
        }
    }

    tracing::debug!("Unix signal handlers registered");
    Ok(())
}

/// Total shutdown signals received so far.
pub fn signal_count() -> u32 {
    SIGNAL_COUNT.load(Ordering::Relaxed)
}
