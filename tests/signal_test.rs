// Integration tests for termination signal handling
//
// Signals are process-wide, so everything runs in a single test.

use chinta::daemon::{install_signal_handlers, ShutdownCause};
use nix::sys::signal::{raise, Signal};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_sigterm_sets_flag_and_wakes_waiter() {
    let flag = install_signal_handlers().expect("handlers should install");
    assert!(!flag.is_requested());

    // Installing twice shares the same marker
    let second = install_signal_handlers().expect("handlers should reinstall");

    let started = Instant::now();
    let waiter = tokio::spawn({
        let flag = flag.clone();
        async move { flag.wait(Duration::from_secs(30)).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    raise(Signal::SIGTERM).expect("raise should succeed");

    assert!(waiter.await.unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(flag.cause(), Some(ShutdownCause::Signal(Signal::SIGTERM)));
    assert!(second.is_requested());
}
