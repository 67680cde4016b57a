//! Scenario 4: `block`/`unblock` as the sole synchronization primitive,
//! grounded on the C source's `test_blocking.c`. The counter is a bare
//! `static mut`, exactly as the C source's unguarded `size_t sum` — the
//! property under test is that `block`/`unblock` alone, with no atomics,
//! is sufficient because every increment runs with the preemption signal
//! masked and there is only ever one kernel thread to begin with.

const NUM_THREADS: usize = 10;
const NUM_ADDS: usize = 20_000;

static mut SUM: u64 = 0;

#[test]
fn ten_threads_increment_a_shared_counter_under_block_unblock() {
    lthreads::init().expect("init should succeed");

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            lthreads::spawn(|| {
                for _ in 0..NUM_ADDS {
                    lthreads::block().expect("block should succeed");
                    // SAFETY: preemption is masked for the whole read-modify-write
                    // sequence below, and this is the only kernel thread that
                    // could ever touch SUM, so this section cannot interleave
                    // with any other access.
                    unsafe {
                        SUM += 1;
                        SUM -= 1;
                        SUM += 1;
                        SUM -= 1;
                        SUM += 1;
                        SUM -= 1;
                        SUM += 1;
                        SUM -= 1;
                        SUM += 1;
                    }
                    lthreads::unblock().expect("unblock should succeed");
                }
            })
            .expect("spawn should succeed")
        })
        .collect();

    for handle in handles {
        lthreads::join(handle).expect("join should succeed");
    }

    // SAFETY: every spawned lthread has been joined above, so nothing else
    // can still be touching SUM.
    let total = unsafe { SUM };
    assert_eq!(total, (NUM_ADDS * NUM_THREADS) as u64);
}
