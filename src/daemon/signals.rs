// Termination signal handling
//
// The handler only stores the signal number into a single atomic marker.
// Logging, closing the sink and releasing the endpoint all happen in the
// normal execution context that observes the marker.

use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const RUNNING: i32 = 0;
const REQUESTED: i32 = -1;

/// Granularity at which `wait` re-checks the marker
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Marker the process-wide signal handler writes to
static PROCESS_MARKER: OnceLock<Arc<AtomicI32>> = OnceLock::new();

extern "C" fn record_signal(signum: c_int) {
    // Async-signal-safe: an atomic load on the OnceLock and an atomic store.
    if let Some(marker) = PROCESS_MARKER.get() {
        marker.store(signum, Ordering::SeqCst);
    }
}

/// Why a shutdown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    Signal(Signal),
    Requested,
}

/// Shared intent-to-stop marker
///
/// `0` while running, the signal number once a termination signal arrives,
/// or `-1` when requested programmatically.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    marker: Arc<AtomicI32>,
}

impl ShutdownFlag {
    /// A flag not connected to any signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown from ordinary code; keeps an earlier signal cause
    pub fn request(&self) {
        let _ = self
            .marker
            .compare_exchange(RUNNING, REQUESTED, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.marker.load(Ordering::SeqCst) != RUNNING
    }

    pub fn cause(&self) -> Option<ShutdownCause> {
        match self.marker.load(Ordering::SeqCst) {
            RUNNING => None,
            REQUESTED => Some(ShutdownCause::Requested),
            signum => Some(
                Signal::try_from(signum)
                    .map(ShutdownCause::Signal)
                    .unwrap_or(ShutdownCause::Requested),
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn simulate_signal(&self, signal: Signal) {
        self.marker.store(signal as i32, Ordering::SeqCst);
    }

    /// Sleep for `interval`, returning early once shutdown is requested
    ///
    /// Returns whether shutdown has been requested.
    pub async fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        while !self.is_requested() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(POLL_SLICE.min(deadline - now)).await;
        }
        true
    }
}

/// Route SIGINT and SIGTERM into the returned flag
///
/// Every call returns a flag sharing the same process-wide marker.
pub fn install_signal_handlers() -> nix::Result<ShutdownFlag> {
    let marker = PROCESS_MARKER.get_or_init(|| Arc::new(AtomicI32::new(RUNNING)));

    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler performs a single atomic store and nothing else.
        unsafe { sigaction(signal, &action) }?;
    }

    Ok(ShutdownFlag {
        marker: Arc::clone(marker),
    })
}
