//! Scenario 2: two concurrently scheduled lthreads, each transforming its
//! own argument, joined in turn.

#[test]
fn two_workers_xor_their_arguments() {
    lthreads::init().expect("init should succeed");

    let worker = |arg: u32| move || 0xDEAD_0000_u32 ^ arg;

    let h1 = lthreads::spawn(worker(1)).expect("spawn should succeed");
    let h2 = lthreads::spawn(worker(2)).expect("spawn should succeed");

    let r1 = lthreads::join(h1).expect("join should succeed");
    let r2 = lthreads::join(h2).expect("join should succeed");

    assert_eq!(r1, 0xDEAD_0001);
    assert_eq!(r2, 0xDEAD_0002);
}
