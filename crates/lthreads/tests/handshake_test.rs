//! Scenario 1 from the testable-properties list: the simplest possible
//! spawn/join round trip.

#[test]
fn spawn_then_join_returns_the_entrys_value() {
    let _ = env_logger::try_init();

    lthreads::init().expect("init should succeed");

    let handle = lthreads::spawn(|| 42).expect("spawn should succeed");
    let rv = lthreads::join(handle).expect("join should succeed");

    assert_eq!(rv, 42);
}
