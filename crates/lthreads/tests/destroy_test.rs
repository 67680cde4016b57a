//! `destroy` is a mandatory Component-F primitive (SPEC_FULL §4.F) with
//! non-trivial logic of its own: forcing a `DONE` transition, waiting for
//! the scheduler to actually splice the target out, and discarding whichever
//! result (finished or not) it finds there. Exercised here on both a
//! not-yet-finished lthread and an already-finished one, since
//! `take_result_if_finished` branches on exactly that distinction.

use std::time::Duration;

#[test]
fn destroy_reaps_a_pending_lthread_and_an_already_finished_one() {
    lthreads::init().expect("init should succeed");

    // Still pending: destroyed immediately after spawn, before it has had
    // any chance to run (let alone finish) its long sleep.
    let pending = lthreads::spawn(|| {
        let _ = lthreads::sleep(Duration::from_secs(3600));
        "should never observe this return value"
    })
    .expect("spawn should succeed");
    lthreads::destroy(pending).expect("destroy of a pending lthread should succeed");

    // Already finished: give the scheduler ample time (relative to the
    // 500us preemption tick) to run this trivial entry to completion and
    // spin in its DONE trampoline loop before destroy ever sees it.
    let finished = lthreads::spawn(|| 99).expect("spawn should succeed");
    lthreads::sleep(Duration::from_millis(50)).expect("sleep should succeed");
    lthreads::destroy(finished).expect("destroy of an already-finished lthread should succeed");
}
