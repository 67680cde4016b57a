//! Scenario 5: `sleep` wakes no earlier than requested, and within the
//! generous upper bound a quiescent test machine should meet even under
//! scheduler jitter.

use std::time::{Duration, Instant};

#[test]
fn sleep_wakes_after_the_requested_duration() {
    lthreads::init().expect("init should succeed");

    let handle = lthreads::spawn(|| {
        let start = Instant::now();
        lthreads::sleep(Duration::from_millis(100)).expect("sleep should succeed");
        start.elapsed()
    })
    .expect("spawn should succeed");

    let elapsed = lthreads::join(handle).expect("join should succeed");

    assert!(elapsed >= Duration::from_millis(100), "woke too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "woke too late: {elapsed:?}");
}
