//! Cooperative-and-preemptive userspace green threads.
//!
//! Each lthread runs on its own `mmap`'d stack and is scheduled from a
//! `SIGRTMIN` timer handler using POSIX `ucontext.h` context switches — the
//! same mechanism the C implementation this crate is modeled on uses, just
//! wrapped in an API that returns typed results and errors instead of
//! `void *` and `-1`.
//!
//! ```no_run
//! lthreads::init().expect("lthreads already initialized");
//! let handle = lthreads::spawn(|| 1 + 1).expect("failed to spawn");
//! let sum = lthreads::join(handle).expect("lthread panicked");
//! assert_eq!(sum, 2);
//! ```
//!
//! # Process model
//!
//! There is exactly one scheduler per process, installed by [`init`] (or
//! [`init_with_config`]) and never torn down explicitly; a `libc::atexit`
//! hook logs a final diagnostic and masks the preemption signal on process
//! exit. Calling any other function in this crate before `init` returns a
//! `NotInitialized`-shaped error rather than panicking.
//!
//! # Non-goals
//!
//! No multi-core parallelism: every lthread runs on the single kernel
//! thread that called `init`. No cross-process scheduling, no I/O
//! readiness integration (lthreads that block on a syscall block the whole
//! process), no priority levels — the run queue is strictly round-robin.

mod api;
mod config;
mod context;
mod descriptor;
mod error;
mod queue;
mod scheduler;
mod signal;

pub use api::{
    block, current_handle, destroy, init, init_with_config, join, sleep, spawn, unblock, yield_now, JoinHandle,
};
pub use config::Config;
pub use descriptor::Handle;
pub use error::{CreateError, InitError, JoinError, MaskError, PanicPayload, SleepError, YieldError};
