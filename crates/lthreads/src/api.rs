//! Public operations: `init`, `spawn`, `join`, `destroy`, `yield_now`,
//! `sleep`, `block`, `unblock`.
//!
//! Each function here is a thin policy layer over the mechanism in
//! `scheduler.rs`: it decides *when* to mask, *what* to mutate, and *which*
//! typed error to surface, while the actual context switch and dispatch
//! logic lives in the signal handler.

use std::any::Any;
use std::marker::PhantomData;
use std::time::Duration;

use crate::config::Config;
use crate::descriptor::{Handle, Status};
use crate::error::{CreateError, InitError, JoinError, MaskError, PanicPayload, SleepError, YieldError};
use crate::scheduler;

/// Initializes the scheduler with [`Config::default`]. Must be called
/// exactly once per process before any other function in this crate.
pub fn init() -> Result<(), InitError> {
    init_with_config(Config::default())
}

/// Initializes the scheduler with caller-supplied tunables.
pub fn init_with_config(config: Config) -> Result<(), InitError> {
    scheduler::bootstrap(config)
}

/// A spawned lthread's join handle, analogous to [`std::thread::JoinHandle`].
///
/// Unlike the C source's bare integer id, this also carries the expected
/// return type, so [`join`] can hand back a `T` instead of a `void *` the
/// caller has to trust and cast themselves.
pub struct JoinHandle<T> {
    handle: Handle,
    _marker: PhantomData<T>,
}

impl<T> JoinHandle<T> {
    /// The underlying type-erased handle, e.g. for logging or `destroy`.
    pub fn raw(&self) -> Handle {
        self.handle
    }
}

/// Spawns a new lthread that runs `entry` to completion on its own mapped
/// stack, scheduled cooperatively and preemptively alongside every other
/// live lthread.
pub fn spawn<F, T>(entry: F) -> Result<JoinHandle<T>, CreateError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let boxed: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send> =
        Box::new(move || Box::new(entry()) as Box<dyn Any + Send>);
    let handle = scheduler::spawn(boxed)?;
    Ok(JoinHandle {
        handle,
        _marker: PhantomData,
    })
}

/// Blocks the calling lthread until `handle`'s lthread has finished,
/// reaping its slot in the handle table and returning its result.
///
/// Busy-waits by repeatedly raising the preemption signal, exactly as the
/// C source's `lthread_join` does: each raise gives the scheduler a chance
/// to run other lthreads (including, eventually, the one being waited on)
/// before this loop checks status again.
pub fn join<T: 'static>(handle: JoinHandle<T>) -> Result<T, JoinError> {
    let raw = reap_when_unlinked(handle.handle)?.ok_or(JoinError::InvalidHandle)?;
    match raw {
        Ok(value) => value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| JoinError::TypeMismatch),
        Err(panic) => Err(JoinError::Panicked(panic)),
    }
}

/// Marks `handle`'s lthread as finished, pre-empting whatever it was doing,
/// then waits for the scheduler to actually splice it out of the run queue
/// and reaps its slot. Mirrors the C source's `lthread_destroy`, which
/// forces `DONE` and then joins.
///
/// If the lthread had already run to completion (or panicked) before
/// `destroy` was called, that outcome is discarded along with whatever the
/// entry closure would otherwise have returned. If it was still pending or
/// mid-run, its half-finished state is simply dropped.
pub fn destroy<T: 'static>(handle: JoinHandle<T>) -> Result<(), JoinError> {
    let outcome = scheduler::with_masked(|scheduler| {
        let descriptor = scheduler
            .handles
            .get(handle.handle)
            .ok_or(JoinError::InvalidHandle)?;
        descriptor.status.set(Status::Done);
        Ok(())
    });
    match outcome {
        Ok(inner) => inner?,
        Err(MaskError::NotInitialized) => return Err(JoinError::NotInitialized),
        Err(MaskError::SigProcMask { .. }) => {
            scheduler::fatal("failed to mask preemption signal in destroy")
        }
    }
    let _ = reap_when_unlinked(handle.handle)?;
    Ok(())
}

type RawResult = Result<Box<dyn Any + Send>, PanicPayload>;

/// Busy-waits, raising the preemption signal like the C source's
/// `lthread_join`, until the scheduler has both marked `handle` `Done` *and*
/// spliced it out of the run queue, then reaps its slot and returns
/// whatever its trampoline produced (or `None` if it was destroyed before
/// finishing).
fn reap_when_unlinked(handle: Handle) -> Result<Option<RawResult>, JoinError> {
    loop {
        let scheduler = scheduler::try_scheduler().ok_or(JoinError::NotInitialized)?;
        let descriptor = scheduler.handles.get(handle).ok_or(JoinError::InvalidHandle)?;
        // Checking `status == Done` alone is not enough: the scheduler's
        // scan for the next runnable member can short-circuit before
        // visiting this descriptor, so a `Done` read here does not imply
        // the ring has released its pointer to it yet. Freeing it (via
        // `handles.remove`) before that would leave the ring holding a
        // dangling pointer.
        if descriptor.status.get() == Status::Done && !descriptor.linked.get() {
            break;
        }
        if scheduler.signal.raise().is_err() {
            scheduler::fatal("failed to raise preemption signal while joining");
        }
    }

    let outcome = scheduler::with_masked(|scheduler| {
        let descriptor = scheduler.handles.get(handle).ok_or(JoinError::InvalidHandle)?;
        let result = descriptor.take_result_if_finished();
        scheduler.handles.remove(handle);
        Ok(result)
    });

    match outcome {
        Ok(inner) => inner,
        Err(MaskError::NotInitialized) => Err(JoinError::NotInitialized),
        Err(MaskError::SigProcMask { .. }) => {
            scheduler::fatal("failed to mask preemption signal while reaping a finished lthread")
        }
    }
}

/// Yields the calling lthread, giving the scheduler a chance to run another
/// ready lthread before this one continues.
pub fn yield_now() -> Result<(), YieldError> {
    let scheduler = scheduler::try_scheduler().ok_or(YieldError::NotInitialized)?;
    scheduler.signal.raise().map_err(YieldError::Raise)
}

/// Puts the calling lthread to sleep for at least `duration`.
///
/// If preemption is currently masked (the caller is inside a [`block`] /
/// [`unblock`] section), this is a no-op: nothing could ever notice the
/// deadline had elapsed and wake this lthread while its own preemption
/// signal stays blocked, so sleeping there would otherwise hang forever.
pub fn sleep(duration: Duration) -> Result<(), SleepError> {
    let scheduler = scheduler::try_scheduler().ok_or(SleepError::NotInitialized)?;

    let was_already_masked = match scheduler.signal.mask_returning_previous() {
        Ok(prev) => prev,
        Err(err) => scheduler::fatal(&format!("failed to mask preemption signal in sleep: {err}")),
    };

    if was_already_masked {
        return Ok(());
    }

    let now = scheduler::monotonic_now();
    let deadline = add_duration(now, duration);

    // SAFETY: queue.current() always points at the descriptor that is
    // presently executing, i.e. the caller of this function.
    let descriptor = unsafe { &*scheduler.queue.current() };
    descriptor.wake_deadline.set(Some(deadline));
    descriptor.status.set(Status::Sleeping);

    if scheduler.signal.raise().is_err() {
        scheduler::fatal("failed to raise preemption signal in sleep");
    }

    if scheduler.signal.unmask().is_err() {
        scheduler::fatal("failed to unmask preemption signal in sleep");
    }

    Ok(())
}

fn add_duration(base: libc::timespec, duration: Duration) -> libc::timespec {
    const NSEC_PER_SEC: i64 = 1_000_000_000;
    let mut secs = base.tv_sec + duration.as_secs() as libc::time_t;
    let mut nanos = base.tv_nsec as i64 + duration.subsec_nanos() as i64;
    if nanos >= NSEC_PER_SEC {
        secs += 1;
        nanos -= NSEC_PER_SEC;
    }
    libc::timespec {
        tv_sec: secs,
        tv_nsec: nanos as libc::c_long,
    }
}

/// Masks the preemption signal on the calling thread. Until [`unblock`] is
/// called, this lthread can never be preempted (though it can still yield
/// voluntarily via [`yield_now`], which simply pends until unblocked).
pub fn block() -> Result<(), MaskError> {
    let scheduler = scheduler::try_scheduler().ok_or(MaskError::NotInitialized)?;
    scheduler
        .signal
        .mask()
        .map_err(|source| MaskError::SigProcMask { op: "mask", source })
}

/// Reverses [`block`].
pub fn unblock() -> Result<(), MaskError> {
    let scheduler = scheduler::try_scheduler().ok_or(MaskError::NotInitialized)?;
    scheduler
        .signal
        .unmask()
        .map_err(|source| MaskError::SigProcMask { op: "unmask", source })
}

/// The handle of whichever lthread is presently running.
pub fn current_handle() -> Option<Handle> {
    let scheduler = scheduler::try_scheduler()?;
    // SAFETY: queue.current() is always a live Descriptor once initialized.
    let descriptor = unsafe { &*scheduler.queue.current() };
    Some(descriptor.handle)
}
