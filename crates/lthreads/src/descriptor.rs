//! Thread descriptor and generational handle table.
//!
//! The handle table is the single owner of every `Descriptor`'s storage
//! (`Box<Descriptor>`, never moved once inserted); the run queue (`queue.rs`)
//! only ever holds the raw, non-owning `*mut Descriptor` pointers handed back
//! by [`HandleTable::insert_with`]. This mirrors the "generational index map"
//! re-architecture the spec calls for in place of the C source's bare array
//! of nullable pointers: a reused slot's old `Handle` no longer matches the
//! slot's bumped generation, so a use-after-join is a typed `None` lookup
//! instead of dereferencing freed memory.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};

use crate::context::Stack;
use crate::error::PanicPayload;

/// Public, stable identity for a live or formerly-live lthread.
///
/// Never dereferenced directly; always looked up through [`HandleTable`],
/// which checks `generation` before handing back the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Lifecycle states from the scheduler's state machine (spec §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Created,
    Ready,
    Running,
    Sleeping,
    #[allow(dead_code)] // reserved for future synchronization objects, not wired to block()
    Blocked,
    Done,
}

type BoxedEntry = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;
type ThunkResult = Result<Box<dyn Any + Send>, PanicPayload>;

/// The descriptor's single opaque slot, reused for argument-then-return just
/// as the C source reused one `void *data` field.
pub(crate) enum Payload {
    /// Not yet run: holds the boxed entry closure.
    Pending(BoxedEntry),
    /// Entry has returned (or panicked): holds the boxed result.
    Finished(ThunkResult),
    /// Taken by the trampoline while running, or never applicable (main thread).
    Empty,
}

/// Per-thread control block. Allocated on the heap by [`HandleTable::insert_with`]
/// and never moved for the lifetime of the lthread.
pub(crate) struct Descriptor {
    pub(crate) handle: Handle,
    pub(crate) status: Cell<Status>,
    /// Wrapped in `UnsafeCell` (rather than a plain field) because the
    /// scheduler mutates it through a shared `&Descriptor` obtained from a
    /// raw run-queue link; see `scheduler::context_ptr`.
    pub(crate) context: UnsafeCell<libc::ucontext_t>,
    /// `None` only for the main thread, which runs on the process's own stack.
    pub(crate) stack: Option<Stack>,
    pub(crate) payload: UnsafeCell<Payload>,
    /// Meaningful only while `status == Sleeping`.
    pub(crate) wake_deadline: Cell<Option<libc::timespec>>,
    /// Non-owning intrusive ring link, manipulated only by `queue.rs`.
    pub(crate) link: Cell<*mut Descriptor>,
    /// Whether `queue.rs` currently holds this descriptor in the ring.
    ///
    /// `status == Done` alone does not mean it is safe to free this
    /// descriptor: the scheduler's scan for the next runnable member can
    /// short-circuit before ever visiting a `Done` descriptor elsewhere in
    /// the ring, so a joiner that only checked `status` could free memory
    /// the ring still links to. `join`/`destroy` wait for `linked == false`
    /// too, which is only ever cleared by `queue::RunQueue::advance`'s
    /// splice path.
    pub(crate) linked: Cell<bool>,
}

// SAFETY: every Descriptor is touched only from the single kernel thread that
// owns the scheduler, and only ever under the "preemption masked" discipline
// for mutation. Send is required because BoxedEntry carries `Send` closures
// and the type must be movable into the handle table's Vec.
unsafe impl Send for Descriptor {}

impl Descriptor {
    pub(crate) fn new_with_entry(handle: Handle, stack: Stack, entry: BoxedEntry) -> Descriptor {
        Descriptor {
            handle,
            status: Cell::new(Status::Created),
            // SAFETY: zero-initializing a ucontext_t is fine; it is fully
            // populated by `context::build_initial` before ever being
            // restored.
            context: UnsafeCell::new(unsafe { std::mem::zeroed() }),
            stack: Some(stack),
            payload: UnsafeCell::new(Payload::Pending(entry)),
            wake_deadline: Cell::new(None),
            link: Cell::new(std::ptr::null_mut()),
            linked: Cell::new(false),
        }
    }

    pub(crate) fn new_main(handle: Handle) -> Descriptor {
        Descriptor {
            handle,
            status: Cell::new(Status::Running),
            // SAFETY: populated immediately by `context::capture` in `api::init`.
            context: UnsafeCell::new(unsafe { std::mem::zeroed() }),
            stack: None,
            payload: UnsafeCell::new(Payload::Empty),
            wake_deadline: Cell::new(None),
            link: Cell::new(std::ptr::null_mut()),
            linked: Cell::new(false),
        }
    }

    /// Raw pointer to this descriptor's saved context, for `context::capture`/
    /// `context::restore`/`context::build_initial`.
    pub(crate) fn context_ptr(&self) -> *mut libc::ucontext_t {
        self.context.get()
    }

    /// Takes the pending entry closure. Must only be called once, by the
    /// first-start trampoline, with preemption unmasked (the trampoline's
    /// very first act after unmasking).
    pub(crate) fn take_entry(&self) -> BoxedEntry {
        // SAFETY: the trampoline is the only code that ever calls this, and
        // it does so exactly once per descriptor, before any other code
        // accesses `payload` concurrently (this descriptor cannot be
        // preempted into again until it sets its own status to Running,
        // which happens after this call per the trampoline contract).
        let payload = unsafe { &mut *self.payload.get() };
        match std::mem::replace(payload, Payload::Empty) {
            Payload::Pending(entry) => entry,
            _ => unreachable!("take_entry called more than once or on a non-pending descriptor"),
        }
    }

    /// Stores the trampoline's result. Must only be called once.
    pub(crate) fn store_result(&self, result: ThunkResult) {
        // SAFETY: see `take_entry`; called exactly once by the trampoline
        // right before it sets status to Done.
        let payload = unsafe { &mut *self.payload.get() };
        *payload = Payload::Finished(result);
    }

    /// Takes the finished result for the joiner. Must only be called with
    /// preemption masked, after observing `status == Done`.
    pub(crate) fn take_result(&self) -> ThunkResult {
        // SAFETY: caller masks preemption and has observed Done, so the
        // trampoline will not run again; no other reader exists.
        let payload = unsafe { &mut *self.payload.get() };
        match std::mem::replace(payload, Payload::Empty) {
            Payload::Finished(result) => result,
            _ => unreachable!("take_result called before the descriptor finished"),
        }
    }

    /// Takes the payload only if the trampoline had already finished it,
    /// discarding a still-pending entry or an already-empty slot instead of
    /// panicking. Used by `destroy`, which may force a descriptor to `Done`
    /// before its trampoline ever ran to completion.
    pub(crate) fn take_result_if_finished(&self) -> Option<ThunkResult> {
        // SAFETY: see `take_result`; same masked-preemption precondition.
        let payload = unsafe { &mut *self.payload.get() };
        match std::mem::replace(payload, Payload::Empty) {
            Payload::Finished(result) => Some(result),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    descriptor: Option<Box<Descriptor>>,
}

/// A dense, generational slab mapping [`Handle`]s to owned [`Descriptor`]s.
///
/// Grows by doubling (spec §4.B / §8 boundary behavior) and never shrinks:
/// the C source's array of thread-storage slots behaved the same way.
pub(crate) struct HandleTable {
    slots: Vec<Slot>,
}

impl HandleTable {
    pub(crate) fn with_capacity(capacity: usize) -> HandleTable {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            descriptor: None,
        });
        HandleTable { slots }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn allocate_index(&mut self) -> u32 {
        if let Some(index) = self.slots.iter().position(|slot| slot.descriptor.is_none()) {
            return index as u32;
        }
        let old_len = self.slots.len();
        let new_len = old_len.saturating_mul(2).max(1);
        self.slots.resize_with(new_len, || Slot {
            generation: 0,
            descriptor: None,
        });
        old_len as u32
    }

    /// Allocates a handle, builds the descriptor from it, and inserts it.
    /// Returns the handle plus a stable raw pointer into the boxed
    /// descriptor for the run queue to link.
    pub(crate) fn insert_with<F>(&mut self, build: F) -> (Handle, *mut Descriptor)
    where
        F: FnOnce(Handle) -> Descriptor,
    {
        let index = self.allocate_index();
        let generation = self.slots[index as usize].generation;
        let handle = Handle { index, generation };
        let mut boxed = Box::new(build(handle));
        let ptr: *mut Descriptor = &mut *boxed;
        self.slots[index as usize].descriptor = Some(boxed);
        (handle, ptr)
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&Descriptor> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.descriptor.as_deref()
    }

    /// Removes and returns the descriptor, bumping the slot's generation so
    /// a stale `Handle` can never again resolve to a (possibly reused) slot.
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<Box<Descriptor>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let descriptor = slot.descriptor.take();
        slot.generation = slot.generation.wrapping_add(1);
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_stack() -> Stack {
        Stack::map(64 * 1024).unwrap()
    }

    #[test]
    fn insert_then_remove_frees_slot_for_reuse() {
        let mut table = HandleTable::with_capacity(2);
        let (h1, _) = table.insert_with(|h| {
            Descriptor::new_with_entry(h, dummy_stack(), Box::new(|| Box::new(()) as Box<dyn Any + Send>))
        });
        assert!(table.get(h1).is_some());
        let removed = table.remove(h1);
        assert!(removed.is_some());
        assert!(table.get(h1).is_none(), "stale handle must not resolve after removal");

        let (h2, _) = table.insert_with(|h| {
            Descriptor::new_with_entry(h, dummy_stack(), Box::new(|| Box::new(()) as Box<dyn Any + Send>))
        });
        assert_eq!(h2.index, h1.index, "freed slot should be reused");
        assert_ne!(h2.generation, h1.generation, "generation must change on reuse");
        assert!(table.get(h1).is_none(), "old handle must still not resolve to the new occupant");
    }

    #[test]
    fn table_doubles_capacity_when_exhausted() {
        let mut table = HandleTable::with_capacity(2);
        assert_eq!(table.capacity(), 2);
        for _ in 0..3 {
            table.insert_with(|h| {
                Descriptor::new_with_entry(h, dummy_stack(), Box::new(|| Box::new(()) as Box<dyn Any + Send>))
            });
        }
        assert!(table.capacity() >= 4, "capacity should have doubled past the initial 2 slots");
    }
}
