//! Scenario 6: a producer/consumer pair coordinated purely by `yield_now`,
//! grounded on the C source's `test_produce_consume.c` (the "Ed" text is
//! carried over verbatim). Each side also wraps its queue access in a brief
//! `block`/`unblock` section: the C source gets away without one because a
//! linked-list node's `next` pointer can be published with a single atomic
//! store, but a `VecDeque` push/pop is not a single instruction the
//! preemption signal could land in the middle of safely.

use std::cell::UnsafeCell;
use std::collections::VecDeque;

const CONTENT: &str = "Note the consistent user interface and error reportage. Ed is generous enough\nto flag errors, yet prudent enough not to overwhelm the novice with verbosity.\n\n'Ed is the standard text editor.'\n\nEd, the greatest WYGIWYG editor of all.\n\nED IS THE TRUE PATH TO NIRVANA! ED HAS BEEN THE CHOICE OF EDUCATED AND IGNORANT\nALIKE FOR CENTURIES! ED WILL NOT CORRUPT YOUR PRECIOUS BODILY FLUIDS!! ED IS\nTHE STANDARD TEXT EDITOR! ED MAKES THE SUN SHINE AND THE BIRDS SING AND THE\nGRASS GREEN!!";

struct SharedQueue(UnsafeCell<VecDeque<String>>);

// SAFETY: every access to the inner VecDeque happens with the preemption
// signal masked (see `block`/`unblock` calls below), so there is never more
// than one reader-or-writer touching it at a time despite the `'static`
// reference being shared across lthreads.
unsafe impl Sync for SharedQueue {}

static QUEUE: SharedQueue = SharedQueue(UnsafeCell::new(VecDeque::new()));
static mut PRODUCER_DONE: bool = false;

#[test]
fn producer_consumer_via_yield_reconstructs_source_text() {
    lthreads::init().expect("init should succeed");

    let producer = lthreads::spawn(|| {
        for line in CONTENT.lines() {
            lthreads::block().expect("block should succeed");
            // SAFETY: masked section; see SharedQueue's Sync justification.
            unsafe {
                (*QUEUE.0.get()).push_back(line.to_string());
            }
            lthreads::unblock().expect("unblock should succeed");

            // Yield to be consumed, as the C source's produce() does.
            lthreads::yield_now().expect("yield_now should succeed");
        }

        lthreads::block().expect("block should succeed");
        // SAFETY: masked section; single writer of PRODUCER_DONE.
        unsafe {
            PRODUCER_DONE = true;
        }
        lthreads::unblock().expect("unblock should succeed");
    })
    .expect("spawn should succeed");

    let consumer = lthreads::spawn(|| {
        let mut collected: Vec<String> = Vec::new();
        loop {
            lthreads::block().expect("block should succeed");
            // SAFETY: masked section; see SharedQueue's Sync justification.
            let popped = unsafe { (*QUEUE.0.get()).pop_front() };
            // SAFETY: masked section; PRODUCER_DONE is only ever set true,
            // never reset, so a racing read here can only be stale-false.
            let producer_finished = unsafe { PRODUCER_DONE };
            lthreads::unblock().expect("unblock should succeed");

            match popped {
                Some(line) => collected.push(line),
                None if producer_finished => break,
                None => {
                    // Wait for the producer's next entry.
                    lthreads::yield_now().expect("yield_now should succeed");
                }
            }
        }
        collected.join("\n")
    })
    .expect("spawn should succeed");

    lthreads::join(producer).expect("join should succeed");
    let text = lthreads::join(consumer).expect("join should succeed");

    assert_eq!(text, CONTENT);
}
