//! Intrusive circular run queue.
//!
//! Mirrors the C source's `push_queue`/`pop_queue`/`bump_queue` triplet: a
//! singly-linked ring of non-owning `*mut Descriptor` pointers, with `tail`
//! kept so insertion is O(1) (`tail.link = new; new.link = tail.link.old`).
//! Storage for every `Descriptor` belongs to the [`crate::descriptor::HandleTable`];
//! this type only ever reads and rewrites `link` fields.

use crate::descriptor::Descriptor;

pub(crate) struct RunQueue {
    /// The descriptor that is either currently running or about to be
    /// restored. Null only before `init_with` has been called.
    current: *mut Descriptor,
    /// The last descriptor in the ring, i.e. the one whose `link` points
    /// back at `current` when the ring holds exactly one member.
    tail: *mut Descriptor,
}

impl RunQueue {
    pub(crate) const fn empty() -> RunQueue {
        RunQueue {
            current: std::ptr::null_mut(),
            tail: std::ptr::null_mut(),
        }
    }

    /// Seeds the ring with a single member (the main thread's descriptor),
    /// linked to itself.
    pub(crate) fn init_with(&mut self, main: *mut Descriptor) {
        // SAFETY: main is a freshly boxed Descriptor the caller guarantees
        // stays alive for the scheduler's lifetime.
        unsafe {
            (*main).link.set(main);
            (*main).linked.set(true);
        }
        self.current = main;
        self.tail = main;
    }

    /// The descriptor presently at the head of the ring.
    pub(crate) fn current(&self) -> *mut Descriptor {
        self.current
    }

    /// Links `descriptor` in immediately after `tail`, making it the new
    /// `tail`. Does not change `current`.
    pub(crate) fn push_tail(&mut self, descriptor: *mut Descriptor) {
        if self.tail.is_null() {
            // SAFETY: an empty ring has no other members to link against;
            // the new descriptor becomes a singleton ring, `current`
            // included. Only reachable before `init_with`, which callers
            // never skip, but kept total rather than panicking.
            unsafe {
                (*descriptor).link.set(descriptor);
                (*descriptor).linked.set(true);
            }
            self.current = descriptor;
            self.tail = descriptor;
            return;
        }
        // SAFETY: tail and every reachable link is a live Descriptor owned
        // by the handle table for as long as it remains linked.
        unsafe {
            let head = (*self.tail).link.get();
            (*self.tail).link.set(descriptor);
            (*descriptor).link.set(head);
            (*descriptor).linked.set(true);
        }
        self.tail = descriptor;
    }

    /// Advances `current` to the next member of the ring.
    ///
    /// If `drop_current` is true, the previously-current descriptor is
    /// spliced out of the ring entirely (its `link` is left dangling; the
    /// caller is responsible for reclaiming the descriptor itself via the
    /// handle table). The ring must have at least one other member in that
    /// case, or the main thread would splice itself out with nothing left to
    /// run — the scheduler's invariant that the main descriptor is never
    /// destroyed ensures this never happens in practice.
    ///
    /// Returns the new `current`.
    pub(crate) fn advance(&mut self, drop_current: bool) -> *mut Descriptor {
        // SAFETY: current is always a live, linked Descriptor once init_with
        // has run.
        let next = unsafe { (*self.current).link.get() };

        if drop_current {
            let dropped = self.current;
            if next == dropped {
                // Only member left; nothing sensible to advance to. Leave
                // the ring pointing at the (now logically invalid) member;
                // the scheduler never reaches this with the main thread.
                self.current = dropped;
                self.tail = dropped;
                return self.current;
            }
            // SAFETY: next and dropped are both live members of the ring;
            // relinking next's predecessor to skip dropped removes it.
            unsafe {
                let mut walker = next;
                while (*walker).link.get() != dropped {
                    walker = (*walker).link.get();
                }
                (*walker).link.set((*dropped).link.get());
                (*dropped).linked.set(false);
            }
            if self.tail == dropped {
                // SAFETY: walker above ends at dropped's former predecessor,
                // which is the new tail; recompute by walking once more from
                // next since `walker` went out of scope.
                let mut tail_walker = next;
                // SAFETY: next is live and the ring (with dropped removed)
                // is still circular.
                unsafe {
                    while (*tail_walker).link.get() != next {
                        tail_walker = (*tail_walker).link.get();
                    }
                }
                self.tail = tail_walker;
            }
            self.current = next;
        } else {
            self.current = next;
        }
        self.current
    }
}

// SAFETY: RunQueue is only ever touched from the single kernel thread
// driving the scheduler (mutation happens with preemption masked, same
// discipline as Scheduler itself); the raw pointers it holds alias
// Descriptors owned elsewhere but are never dereferenced concurrently.
unsafe impl Send for RunQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Stack;
    use crate::descriptor::{Descriptor, Handle};
    use std::any::Any;

    fn leaked(handle: Handle) -> *mut Descriptor {
        let stack = Stack::map(64 * 1024).unwrap();
        let descriptor = Descriptor::new_with_entry(
            handle,
            stack,
            Box::new(|| Box::new(()) as Box<dyn Any + Send>),
        );
        Box::into_raw(Box::new(descriptor))
    }

    fn h(index: u32) -> Handle {
        Handle { index, generation: 0 }
    }

    #[test]
    fn single_member_ring_links_to_itself() {
        let mut queue = RunQueue::empty();
        let main = leaked(h(0));
        queue.init_with(main);
        assert_eq!(queue.current(), main);
        assert_eq!(queue.advance(false), main);
    }

    #[test]
    fn advance_without_drop_cycles_through_all_members() {
        let mut queue = RunQueue::empty();
        let a = leaked(h(0));
        queue.init_with(a);
        let b = leaked(h(1));
        let c = leaked(h(2));
        queue.push_tail(b);
        queue.push_tail(c);

        assert_eq!(queue.current(), a);
        assert_eq!(queue.advance(false), b);
        assert_eq!(queue.advance(false), c);
        assert_eq!(queue.advance(false), a);
    }

    #[test]
    fn advance_with_drop_splices_current_out_of_the_ring() {
        let mut queue = RunQueue::empty();
        let a = leaked(h(0));
        queue.init_with(a);
        let b = leaked(h(1));
        let c = leaked(h(2));
        queue.push_tail(b);
        queue.push_tail(c);

        // current is a; drop it, landing on b.
        assert_eq!(queue.advance(true), b);
        // ring is now b -> c -> b
        assert_eq!(queue.advance(false), c);
        assert_eq!(queue.advance(false), b);
    }
}
