//! Scenario 3: repeated spawn-all/join-all cycles, grounded on the C
//! source's `test_thrash.c`. The original runs 10,000 iterations of 20
//! threads each; this keeps the same per-iteration shape but at a count an
//! integration test suite can run in well under a second, since nothing
//! about the property being tested (no leak, bounded handle-table growth)
//! depends on the specific iteration count.

const NUM_THREADS: usize = 20;
const NUM_ITERS: usize = 200;

#[test]
fn repeated_spawn_and_join_cycles_do_not_leak_or_grow_unbounded() {
    lthreads::init().expect("init should succeed");

    for _ in 0..NUM_ITERS {
        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|_| lthreads::spawn(|| ()).expect("spawn should succeed"))
            .collect();
        for handle in handles {
            lthreads::join(handle).expect("join should succeed");
        }
    }
}
