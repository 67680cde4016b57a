//! Error types for the public API.
//!
//! Scheduler-internal faults (capture failure, handle-table growth failure)
//! are not represented here: per the failure-semantics design, those are
//! fatal and abort the process from inside the signal handler. These types
//! cover only the cases a caller outside the handler can act on.

use std::any::Any;
use std::fmt;

/// Errors that can occur during [`crate::init`] / [`crate::init_with_config`].
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("lthreads already initialized")]
    AlreadyInitialized,
    #[error("failed to install SIGRTMIN handler: {0}")]
    SignalHandlerInstall(#[source] std::io::Error),
    #[error("failed to mask/unmask the preemption signal during init: {0}")]
    MaskOp(#[source] std::io::Error),
    #[error("failed to create preemption timer: {0}")]
    TimerCreate(#[source] std::io::Error),
    #[error("failed to arm preemption timer: {0}")]
    TimerArm(#[source] std::io::Error),
    #[error("failed to capture main-thread context: {0}")]
    ContextCapture(#[source] std::io::Error),
}

/// Errors that can occur during [`crate::spawn`].
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("lthreads not initialized; call lthreads::init() first")]
    NotInitialized,
    #[error("failed to map thread stack: {0}")]
    StackAlloc(#[source] std::io::Error),
    #[error("failed to build initial machine context: {0}")]
    ContextBuild(#[source] std::io::Error),
}

/// A caught panic payload, as produced by [`std::panic::catch_unwind`].
pub struct PanicPayload(pub Box<dyn Any + Send + 'static>);

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = panic_message(&self.0);
        write!(f, "PanicPayload({msg:?})")
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send + 'static)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Errors that can occur during [`crate::join`].
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("lthreads not initialized; call lthreads::init() first")]
    NotInitialized,
    #[error("handle out of range or already reaped")]
    InvalidHandle,
    #[error("lthread entry panicked: {}", panic_message(&.0.0))]
    Panicked(PanicPayload),
    #[error("lthread entry returned a value of an unexpected type (internal bug)")]
    TypeMismatch,
}

/// Errors that can occur during [`crate::sleep`].
#[derive(Debug, thiserror::Error)]
pub enum SleepError {
    #[error("lthreads not initialized; call lthreads::init() first")]
    NotInitialized,
    #[error("failed to read monotonic clock: {0}")]
    ClockRead(#[source] std::io::Error),
}

/// Errors that can occur during [`crate::yield_now`].
#[derive(Debug, thiserror::Error)]
pub enum YieldError {
    #[error("lthreads not initialized; call lthreads::init() first")]
    NotInitialized,
    #[error("failed to raise preemption signal: {0}")]
    Raise(#[source] std::io::Error),
}

/// Errors that can occur during [`crate::block`] / [`crate::unblock`].
#[derive(Debug, thiserror::Error)]
pub enum MaskError {
    #[error("lthreads not initialized; call lthreads::init() first")]
    NotInitialized,
    #[error("failed to {op} the preemption signal: {source}")]
    SigProcMask {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}
