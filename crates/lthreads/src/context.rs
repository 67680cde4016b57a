//! Machine-context switch primitive and stack mapping.
//!
//! Backed directly by POSIX `ucontext.h` via `libc::getcontext`/`setcontext`/
//! `makecontext`, the same facility the original C implementation used. No
//! hand-written assembly trampoline is attempted: `makecontext` already
//! knows the platform calling convention and stack-growth direction, and
//! reimplementing it would only reproduce `glibc`'s own (deprecated but
//! functional) context-switch machinery less reliably.
//!
//! # Safety
//!
//! Every function here is `unsafe` and has a precondition beyond what the
//! type system expresses: `capture`/`restore` operate on a live
//! `ucontext_t` whose `uc_stack` must describe memory that remains mapped
//! for as long as the context might be restored, and no Rust value with a
//! non-trivial destructor may be alive on the stack across a `capture` call
//! whose matching `restore` runs on a different logical resumption (the
//! scheduler never drops anything across that boundary; see `scheduler.rs`).

use std::io;
use std::ptr;

/// One lthread's mapped stack: a guard page followed by the usable region.
///
/// `mmap`'d anonymous and private, matching `allocate_thread_stack` in the
/// libc-reimplementation idiom this crate's stack allocation is grounded on:
/// a single region is mapped read+write, then the low page is switched to
/// `PROT_NONE` so a stack overflow faults instead of silently corrupting the
/// next lthread's stack.
pub(crate) struct Stack {
    base: *mut libc::c_void,
    total_size: usize,
    guard_size: usize,
}

// SAFETY: a `Stack` is owned by exactly one `Descriptor` at a time and is
// only ever touched from the single kernel thread driving the scheduler;
// `Send` is required so `Descriptor` (boxed and moved into the handle table)
// can be built and moved across function boundaries on that one thread.
unsafe impl Send for Stack {}

impl Stack {
    /// Maps a `usable_size`-byte stack plus one guard page below it.
    pub(crate) fn map(usable_size: usize) -> io::Result<Stack> {
        // SAFETY: sysconf with a valid name constant has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let guard_size = if page_size > 0 { page_size as usize } else { 4096 };
        let total_size = guard_size + usable_size;

        // SAFETY: anonymous, private mapping with no fd; all arguments are
        // well-formed constants or caller-supplied sizes.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: base/guard_size are within the region just mapped above.
        let guard_result = unsafe { libc::mprotect(base, guard_size, libc::PROT_NONE) };
        if guard_result != 0 {
            let err = io::Error::last_os_error();
            // SAFETY: base/total_size are the region we just mapped; tearing
            // it down on the guard-page failure path leaks nothing.
            unsafe { libc::munmap(base, total_size) };
            return Err(err);
        }

        Ok(Stack {
            base,
            total_size,
            guard_size,
        })
    }

    /// Pointer to the low address of the *usable* (non-guard) region.
    pub(crate) fn usable_ptr(&self) -> *mut libc::c_void {
        // SAFETY: guard_size is within total_size by construction.
        unsafe { self.base.add(self.guard_size) }
    }

    pub(crate) fn usable_size(&self) -> usize {
        self.total_size - self.guard_size
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: base/total_size were returned together by `mmap` in `map`
        // and are not referenced by anything once the owning Descriptor (and
        // hence this Stack) is dropped — the scheduler only drops a
        // Descriptor after observing its status as DONE and splicing it out
        // of the run queue, so its context is no longer live.
        unsafe {
            libc::munmap(self.base, self.total_size);
        }
    }
}

/// Records the current machine context into `ctx`.
///
/// Equivalent to `getcontext(3)`. A later `restore` of `ctx` resumes
/// execution at the instruction immediately following this call.
///
/// # Safety
///
/// `ctx` must point to valid, writable memory for one `ucontext_t`.
pub(crate) unsafe fn capture(ctx: *mut libc::ucontext_t) -> io::Result<()> {
    // SAFETY: forwarded from the caller's precondition.
    let ret = unsafe { libc::getcontext(ctx) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Restores the machine context previously saved into `ctx`. Never returns.
///
/// # Safety
///
/// `ctx` must have been populated by a prior [`capture`] or [`build_initial`]
/// and must describe a stack that is still mapped.
pub(crate) unsafe fn restore(ctx: *mut libc::ucontext_t) -> ! {
    // SAFETY: forwarded from the caller's precondition.
    unsafe {
        libc::setcontext(ctx);
    }
    // POSIX: setcontext only returns on failure, which for a context we built
    // ourselves indicates corrupted scheduler state — the caller's contract
    // says this point is unreachable, so a panic rather than UB-via-fallthrough.
    panic!("setcontext returned unexpectedly; scheduler state is corrupt");
}

/// Builds a context that, when restored, begins executing `trampoline` on
/// `stack`.
///
/// No argument is threaded through `makecontext`'s C varargs: the resumed
/// context finds its own descriptor via `queue::current()`, which by
/// construction already points at whichever descriptor is about to run.
/// That sidesteps relying on `makecontext` to marshal a non-`int`-sized
/// argument correctly across platforms.
///
/// # Safety
///
/// `ctx` must point to valid, writable memory for one `ucontext_t`; `stack`
/// must outlive every future `restore` of `ctx`.
pub(crate) unsafe fn build_initial(
    ctx: *mut libc::ucontext_t,
    stack: &Stack,
    trampoline: extern "C" fn(),
) -> io::Result<()> {
    // SAFETY: forwarded from the caller's precondition.
    unsafe { capture(ctx)? };

    // SAFETY: ctx was just populated by capture above, so dereferencing to
    // set uc_stack/uc_link is writing to a valid ucontext_t.
    unsafe {
        (*ctx).uc_stack.ss_sp = stack.usable_ptr();
        (*ctx).uc_stack.ss_size = stack.usable_size();
        (*ctx).uc_stack.ss_flags = 0;
        (*ctx).uc_link = ptr::null_mut();
    }

    // SAFETY: ctx describes a valid, sufficiently large mapped stack set
    // above; trampoline takes no arguments, matching makecontext's argc of 0.
    unsafe {
        libc::makecontext(ctx, trampoline, 0);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_stack_succeeds_and_is_page_aligned() {
        let stack = Stack::map(64 * 1024).expect("map should succeed");
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        assert_eq!(stack.usable_ptr() as usize % page_size, 0);
        assert!(stack.usable_size() >= 64 * 1024);
    }

    #[test]
    fn capture_round_trips_without_restoring() {
        let mut ctx: libc::ucontext_t = unsafe { std::mem::zeroed() };
        let result = unsafe { capture(&mut ctx as *mut _) };
        assert!(result.is_ok());
    }
}
