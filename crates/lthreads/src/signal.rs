//! Preemption signal plumbing: handler installation, masking, and the
//! interval timer that drives it.
//!
//! Grounded directly on the C source's use of `sigaction`/`sigprocmask`/
//! `timer_create`/`timer_settime` with `SIGRTMIN` as the preemption signal;
//! the real-time signal (rather than `SIGALRM`) is kept so the handler can
//! be blocked/unblocked independently of anything else in a host process
//! that embeds this scheduler.

use std::io;
use std::mem::MaybeUninit;

/// Installs `handler` for `signal`, masks it for the duration of setup, and
/// leaves it unmasked on success so the timer (armed separately) can deliver
/// it.
pub(crate) struct PreemptionSignal {
    signal: libc::c_int,
}

impl PreemptionSignal {
    /// Installs the handler for `signal`. The signal starts masked; callers
    /// unmask it explicitly once the scheduler is fully initialized.
    pub(crate) fn install(signal: libc::c_int, handler: extern "C" fn(libc::c_int)) -> io::Result<PreemptionSignal> {
        // SAFETY: sa_mask/sa_flags/sa_sigaction form a well-formed sigaction;
        // SA_RESTART avoids spurious EINTR in unrelated syscalls elsewhere in
        // a host process.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as usize;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);

            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(PreemptionSignal { signal })
    }

    pub(crate) fn number(&self) -> libc::c_int {
        self.signal
    }

    /// Blocks the preemption signal on this (the only) kernel thread.
    pub(crate) fn mask(&self) -> io::Result<()> {
        self.set_mask(libc::SIG_BLOCK)
    }

    /// Unblocks the preemption signal on this kernel thread.
    pub(crate) fn unmask(&self) -> io::Result<()> {
        self.set_mask(libc::SIG_UNBLOCK)
    }

    /// Blocks the preemption signal like [`PreemptionSignal::mask`], but also
    /// reports whether it was already blocked beforehand (e.g. by a
    /// surrounding [`crate::block`]).
    pub(crate) fn mask_returning_previous(&self) -> io::Result<bool> {
        // SAFETY: set/old are fully initialized sigset_t values before use.
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, self.signal);
            let mut old: libc::sigset_t = std::mem::zeroed();
            if libc::sigprocmask(libc::SIG_BLOCK, &set, &mut old) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(libc::sigismember(&old, self.signal) == 1)
        }
    }

    fn set_mask(&self, how: libc::c_int) -> io::Result<()> {
        // SAFETY: set is a single-signal mask built just above; sigprocmask
        // with a valid `how` and non-null `set` has no further preconditions.
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, self.signal);
            if libc::sigprocmask(how, &set, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Raises the preemption signal on the calling thread, the same way the
    /// C source's `lthread_yield` forced an immediate reschedule.
    pub(crate) fn raise(&self) -> io::Result<()> {
        // SAFETY: raise with a valid signal number always succeeds or
        // returns a documented errno.
        let ret = unsafe { libc::raise(self.signal) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// POSIX interval timer delivering [`PreemptionSignal`]'s signal on a fixed
/// period, matching `ALARM_INTERVAL_NS` in the C source.
pub(crate) struct PreemptionTimer {
    id: libc::timer_t,
}

impl PreemptionTimer {
    /// Creates (but does not arm) a timer that, once armed, delivers
    /// `signal` via `SIGEV_SIGNAL`.
    pub(crate) fn create(signal: libc::c_int) -> io::Result<PreemptionTimer> {
        // SAFETY: sigevent configured to deliver `signal` via SIGEV_SIGNAL,
        // the only notification mode `timer_create` requires no extra
        // thread/tid bookkeeping for.
        let id = unsafe {
            let mut sev: libc::sigevent = std::mem::zeroed();
            sev.sigev_notify = libc::SIGEV_SIGNAL;
            sev.sigev_signo = signal;

            let mut timer_id = MaybeUninit::<libc::timer_t>::uninit();
            if libc::timer_create(libc::CLOCK_MONOTONIC, &mut sev, timer_id.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            timer_id.assume_init()
        };

        Ok(PreemptionTimer { id })
    }

    /// Arms (or re-arms) the timer to fire repeatedly every `interval`.
    pub(crate) fn arm(&self, interval: std::time::Duration) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: duration_to_timespec(interval),
            it_value: duration_to_timespec(interval),
        };
        // SAFETY: self.id was just returned by timer_create; spec is a
        // well-formed itimerspec with a non-zero interval and value.
        let ret = unsafe { libc::timer_settime(self.id, 0, &spec, std::ptr::null_mut()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PreemptionTimer {
    fn drop(&mut self) {
        // SAFETY: self.id is a live timer created by create_and_arm and not
        // otherwise deleted.
        unsafe {
            libc::timer_delete(self.id);
        }
    }
}

fn duration_to_timespec(d: std::time::Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop_handler(_sig: libc::c_int) {}

    #[test]
    fn install_and_mask_roundtrip_does_not_error() {
        // Use a high real-time signal unlikely to collide with the global
        // scheduler's own handler if tests run in the same process.
        let signal = unsafe { libc::SIGRTMIN() } + 5;
        let installed = PreemptionSignal::install(signal, noop_handler).expect("install should succeed");
        installed.mask().expect("mask should succeed");
        installed.unmask().expect("unmask should succeed");
    }
}
