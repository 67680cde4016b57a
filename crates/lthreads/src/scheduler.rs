//! The process-wide scheduler singleton, its signal handler, and the
//! trampoline every newly spawned lthread starts in.
//!
//! This is the direct Rust counterpart of `lthread_alarm_handler` /
//! `lthread_run` / `lthread_init` in the C source, restructured around
//! [`crate::queue::RunQueue`] and [`crate::descriptor::HandleTable`] instead
//! of a bare linked list and a realloc'd pointer array.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::Config;
use crate::context::{self, Stack};
use crate::descriptor::{Descriptor, Handle, HandleTable, Status};
use crate::error::{CreateError, InitError, MaskError};
use crate::queue::RunQueue;
use crate::signal::{PreemptionSignal, PreemptionTimer};

type BoxedEntry = Box<dyn FnOnce() -> Box<dyn std::any::Any + Send> + Send>;

pub(crate) struct Scheduler {
    pub(crate) handles: HandleTable,
    pub(crate) queue: RunQueue,
    pub(crate) signal: PreemptionSignal,
    #[allow(dead_code)] // kept alive for its Drop impl; re-armed only at init
    timer: PreemptionTimer,
    pub(crate) config: Config,
}

struct SchedulerCell(UnsafeCell<Option<Scheduler>>);

// SAFETY: the cell is only ever read or written from the single kernel
// thread that called `init`, either directly or while that thread is
// inside its own `SIGRTMIN` handler. No other thread ever touches it.
unsafe impl Sync for SchedulerCell {}

static SCHEDULER: SchedulerCell = SchedulerCell(UnsafeCell::new(None));

/// Number of times the preemption handler has run, for [`teardown`]'s
/// diagnostic rate log — the always-on counterpart of the C source's
/// `LTHREAD_DEBUG`-gated `signal_handler_inst`.
static HANDLER_INVOCATIONS: AtomicU64 = AtomicU64::new(0);

/// Every full lap of the run queue without finding a runnable member calls
/// `sched_yield` once per this many descriptors visited, so an all-sleeping
/// or all-blocked scheduler doesn't pin the CPU at 100% inside the signal
/// handler while waiting for a deadline or an external unblock.
const SPIN_YIELD_STRIDE: u32 = 64;

pub(crate) fn is_initialized() -> bool {
    // SAFETY: read-only access to the Option's discriminant; any concurrent
    // write can only come from this same thread (see SchedulerCell's Sync
    // impl note), never truly concurrently.
    unsafe { (*SCHEDULER.0.get()).is_some() }
}

/// Accessor for code that runs only once the scheduler is known to exist:
/// the signal handler and the trampoline, both of which are only ever
/// reachable after a successful `bootstrap`.
///
/// # Safety
///
/// Must only be called when `is_initialized()` is known to be true, and the
/// caller must already be executing on the single kernel thread that owns
/// the scheduler.
unsafe fn scheduler() -> &'static mut Scheduler {
    // SAFETY: forwarded from the caller's precondition.
    match unsafe { &mut *SCHEDULER.0.get() } {
        Some(s) => s,
        None => fatal("scheduler accessed before init"),
    }
}

/// Safe accessor for the public API surface: `None` before `init`.
pub(crate) fn try_scheduler() -> Option<&'static mut Scheduler> {
    // SAFETY: same reasoning as `scheduler`, just without the abort.
    unsafe { &mut *SCHEDULER.0.get() }.as_mut()
}

/// Runs `f` with the preemption signal masked, the discipline every mutation
/// of scheduler state outside the handler itself must follow.
pub(crate) fn with_masked<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Result<R, MaskError> {
    let scheduler = try_scheduler().ok_or(MaskError::NotInitialized)?;
    scheduler
        .signal
        .mask()
        .map_err(|source| MaskError::SigProcMask { op: "mask", source })?;
    let result = f(scheduler);
    scheduler
        .signal
        .unmask()
        .map_err(|source| MaskError::SigProcMask { op: "unmask", source })?;
    Ok(result)
}

pub(crate) fn fatal(message: &str) -> ! {
    log::error!("lthreads: fatal scheduler error: {message}");
    std::process::abort()
}

pub(crate) fn monotonic_now() -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: CLOCK_MONOTONIC is always a valid clock id; ts is a valid
    // out-pointer for one timespec.
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
        fatal("clock_gettime(CLOCK_MONOTONIC) failed");
    }
    ts
}

fn done_sleeping(descriptor: &Descriptor) -> bool {
    let Some(deadline) = descriptor.wake_deadline.get() else {
        return true;
    };
    let now = monotonic_now();
    now.tv_sec > deadline.tv_sec || (now.tv_sec == deadline.tv_sec && now.tv_nsec >= deadline.tv_nsec)
}

/// Installs the signal handler, creates (but leaves disarmed) the
/// preemption timer, captures the calling thread's context as the initial
/// ring member, arms the timer, and publishes the global scheduler.
///
/// Mirrors `lthread_init` step for step; see module docs.
pub(crate) fn bootstrap(config: Config) -> Result<(), InitError> {
    if is_initialized() {
        return Err(InitError::AlreadyInitialized);
    }

    let signal_number = config.preemption_signal;
    let signal =
        PreemptionSignal::install(signal_number, alarm_handler).map_err(InitError::SignalHandlerInstall)?;
    signal.mask().map_err(InitError::MaskOp)?;

    let timer = PreemptionTimer::create(signal_number).map_err(InitError::TimerCreate)?;

    let mut handles = HandleTable::with_capacity(config.initial_capacity);
    let (_main_handle, main_ptr) = handles.insert_with(Descriptor::new_main);

    // Captures the bootstrap call site as a placeholder resumption point for
    // the main thread; it is immediately superseded the first time
    // `alarm_handler` preempts the main thread and re-captures its context
    // at that (deeper) call site, exactly as in the C source's
    // `lthread_init`/`lthread_alarm_handler` pair.
    //
    // SAFETY: main_ptr was just inserted and is not yet reachable from
    // anywhere but this function.
    unsafe { context::capture((*main_ptr).context_ptr()) }.map_err(InitError::ContextCapture)?;

    let mut queue = RunQueue::empty();
    queue.init_with(main_ptr);

    timer.arm(config.alarm_interval).map_err(InitError::TimerArm)?;

    let scheduler = Scheduler {
        handles,
        queue,
        signal,
        timer,
        config,
    };

    // SAFETY: is_initialized() was checked false above and the preemption
    // signal is still masked, so nothing else can observe or mutate the
    // cell concurrently.
    unsafe {
        *SCHEDULER.0.get() = Some(scheduler);
    }

    // SAFETY: the cell was just populated above.
    unsafe { scheduler().signal.unmask() }.map_err(InitError::MaskOp)?;

    PROCESS_START.get_or_init(Instant::now);
    log::info!("lthreads: scheduler initialized");
    // SAFETY: libc::atexit with a valid extern "C" fn pointer and no
    // preconditions beyond that.
    unsafe {
        libc::atexit(teardown_at_exit);
    }

    Ok(())
}

extern "C" fn teardown_at_exit() {
    teardown();
}

fn teardown() {
    if let Some(scheduler) = try_scheduler() {
        if scheduler.signal.mask().is_err() {
            log::warn!("lthreads: failed to mask preemption signal during teardown");
        }
    }
    let invocations = HANDLER_INVOCATIONS.load(Ordering::Relaxed);
    if let Some(start) = PROCESS_START.get() {
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            log::debug!(
                "lthreads: preemption handler ran {invocations} times ({:.1}/s over {:.3}s)",
                invocations as f64 / elapsed,
                elapsed
            );
        }
    }
}

static PROCESS_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Spawns a new lthread running `entry`, returning its handle once it has
/// been linked into the run queue as `Ready`-to-run (technically `Created`,
/// scheduled identically to `Ready`; see [`Status`]).
pub(crate) fn spawn(entry: BoxedEntry) -> Result<Handle, CreateError> {
    let scheduler = try_scheduler().ok_or(CreateError::NotInitialized)?;

    if let Err(err) = scheduler.signal.mask() {
        fatal(&format!("failed to mask preemption signal in spawn: {err}"));
    }
    let result = scheduler.spawn_locked(entry);
    if let Err(err) = scheduler.signal.unmask() {
        fatal(&format!("failed to unmask preemption signal in spawn: {err}"));
    }
    result
}

impl Scheduler {
    fn spawn_locked(&mut self, entry: BoxedEntry) -> Result<Handle, CreateError> {
        let stack = Stack::map(self.config.stack_size).map_err(CreateError::StackAlloc)?;
        let (handle, ptr) = self
            .handles
            .insert_with(|h| Descriptor::new_with_entry(h, stack, entry));

        // SAFETY: ptr was just inserted; nothing else can reach it yet.
        let build_result = unsafe {
            let descriptor = &*ptr;
            let stack_ref = descriptor
                .stack
                .as_ref()
                .expect("freshly created descriptor always owns its stack");
            context::build_initial(descriptor.context_ptr(), stack_ref, trampoline)
        };
        if let Err(err) = build_result {
            self.handles.remove(handle);
            return Err(CreateError::ContextBuild(err));
        }

        self.queue.push_tail(ptr);
        Ok(handle)
    }
}

/// Entry point every freshly spawned lthread's context resumes into.
///
/// Counterpart of the C source's `lthread_run`. Unlike the C source, which
/// receives its descriptor's array index as a `makecontext` argument, this
/// trampoline finds its own descriptor via `queue.current()`: by
/// construction, the scheduler only ever restores a context after making
/// that descriptor `current`.
extern "C" fn trampoline() {
    // SAFETY: reached only by a context built by `build_initial` and
    // restored by `alarm_handler`, both of which only run after `bootstrap`.
    let scheduler = unsafe { scheduler() };

    if let Err(err) = scheduler.signal.unmask() {
        fatal(&format!("failed to unmask preemption signal in trampoline: {err}"));
    }

    // SAFETY: queue.current() is this descriptor, kept alive by the handle
    // table for as long as this lthread is linked into the run queue.
    let descriptor = unsafe { &*scheduler.queue.current() };
    let entry = descriptor.take_entry();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry))
        .map_err(crate::error::PanicPayload);
    descriptor.store_result(result);
    descriptor.status.set(Status::Done);

    // Matches the C source's `for (;;) raise(LTHREAD_SIG);`: a finished
    // lthread has nowhere else to go and must never fall off its own stack.
    // The very next signal delivery (at most one timer period away, sooner
    // if some other thread raises it explicitly) sees `Done` and splices
    // this descriptor out without ever resuming its context again.
    loop {
        let _ = scheduler.signal.raise();
    }
}

/// `SIGRTMIN` handler: saves the interrupted thread's context (unless it has
/// finished), finds the next runnable thread, and restores its context.
///
/// Counterpart of `lthread_alarm_handler`.
extern "C" fn alarm_handler(_signal: libc::c_int) {
    HANDLER_INVOCATIONS.fetch_add(1, Ordering::Relaxed);

    // SAFETY: the handler is only ever installed after `bootstrap` has
    // published the scheduler.
    let scheduler = unsafe { scheduler() };
    if scheduler.signal.mask().is_err() {
        fatal("failed to mask preemption signal at handler entry");
    }

    let mut remove_current = false;
    // SAFETY: queue.current() is always a live, linked Descriptor.
    let current = unsafe { &*scheduler.queue.current() };

    if current.status.get() == Status::Done {
        remove_current = true;
    } else {
        if current.status.get() == Status::Running {
            current.status.set(Status::Ready);
        }

        // SAFETY: context_ptr points at valid, writable storage owned by
        // this descriptor.
        if let Err(err) = unsafe { context::capture(current.context_ptr()) } {
            fatal(&format!("getcontext failed in alarm handler: {err}"));
        }

        // If we get here with status RUNNING, a `restore` elsewhere just
        // resumed exactly this point (the capture above "returned a second
        // time"); this invocation of the handler is done.
        if current.status.get() == Status::Running {
            if scheduler.signal.unmask().is_err() {
                fatal("failed to unmask preemption signal on early handler return");
            }
            return;
        }
    }

    let mut scanned: u32 = 0;
    let next = loop {
        let candidate_ptr = scheduler.queue.advance(remove_current);
        remove_current = false;
        // SAFETY: advance() always returns a live, linked Descriptor once
        // the ring has at least one member (guaranteed: the main thread is
        // never removed).
        let candidate = unsafe { &*candidate_ptr };

        match candidate.status.get() {
            Status::Created | Status::Ready => break candidate_ptr,
            Status::Running => {
                log::error!("lthreads: descriptor marked Running while not current (internal bug)");
            }
            Status::Sleeping => {
                if done_sleeping(candidate) {
                    candidate.wake_deadline.set(None);
                    candidate.status.set(Status::Ready);
                    break candidate_ptr;
                }
            }
            Status::Blocked => {}
            Status::Done => {
                remove_current = true;
            }
        }

        scanned += 1;
        if scanned % SPIN_YIELD_STRIDE == 0 {
            // SAFETY: sched_yield has no preconditions.
            unsafe {
                libc::sched_yield();
            }
        }
    };

    // SAFETY: next is a live Descriptor, about to become current.
    let next_ref = unsafe { &*next };
    next_ref.status.set(Status::Running);
    // SAFETY: next's context was populated either by `build_initial` (first
    // start) or by a prior `capture` in this handler (resumption); never
    // returns.
    unsafe { context::restore(next_ref.context_ptr()) }
}
