//! Signal dispositions and masking for the shell and its children.
//!
//! The SIGCHLD handler does nothing but raise a flag; the reaper drains the
//! actual child statuses from the main loop.

use std::sync::atomic::{AtomicBool, Ordering};

use failure::ResultExt;
use log::debug;
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};

use crate::errors::{ErrorKind, Result};
use crate::util;

/// Signals an interactive shell ignores and its children reset to default.
const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

static CHILD_STATUS_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigchld(_: libc::c_int) {
    CHILD_STATUS_PENDING.store(true, Ordering::SeqCst);
}

pub fn install_sigchld_handler() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sigchld),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // handle_sigchld only touches an atomic
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }.context(ErrorKind::Nix)?;
    debug!("installed SIGCHLD handler");
    Ok(())
}

/// Returns whether a SIGCHLD arrived since the last call, clearing the flag.
pub fn take_child_status_pending() -> bool {
    CHILD_STATUS_PENDING.swap(false, Ordering::SeqCst)
}

pub fn ignore_job_control_signals() -> Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    for &sig in &JOB_CONTROL_SIGNALS {
        unsafe { signal::sigaction(sig, &ignore) }.context(ErrorKind::Nix)?;
    }
    Ok(())
}

/// Signals a child restores to their default disposition before `exec`.
///
/// SIGPIPE is ignored by the Rust runtime and an ignored disposition
/// survives `exec`.
const EXEC_DEFAULT_SIGNALS: [Signal; 2] = [Signal::SIGCHLD, Signal::SIGPIPE];

/// Restores default dispositions and an empty signal mask in a freshly
/// forked child, so the program it execs sees a clean slate.
pub fn reset_for_exec() -> nix::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for &sig in JOB_CONTROL_SIGNALS.iter().chain(&EXEC_DEFAULT_SIGNALS) {
        unsafe { signal::sigaction(sig, &default) }?;
    }
    SigSet::empty().thread_set_mask()
}

/// RAII guard keeping a set of signals blocked for the calling thread.
///
/// Dropping the guard restores the mask that was in effect before, so guards
/// nest. Failing to change the mask is fatal.
#[derive(Debug)]
pub struct SignalMask {
    previous: SigSet,
}

impl SignalMask {
    pub fn block(signals: &[Signal]) -> SignalMask {
        let mut set = SigSet::empty();
        for &sig in signals {
            set.add(sig);
        }

        let mut previous = SigSet::empty();
        if let Err(e) =
            signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))
        {
            util::fatal("sigprocmask", e);
        }
        SignalMask { previous }
    }

    /// Blocks SIGCHLD.
    pub fn child_status() -> SignalMask {
        SignalMask::block(&[Signal::SIGCHLD])
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        if let Err(e) = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None)
        {
            util::fatal("sigprocmask", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_blocked(sig: Signal) -> bool {
        SigSet::thread_get_mask().unwrap().contains(sig)
    }

    #[test]
    fn test_signal_mask_restores_previous_mask() {
        assert!(!is_blocked(Signal::SIGUSR2));
        {
            let _outer = SignalMask::block(&[Signal::SIGUSR2]);
            assert!(is_blocked(Signal::SIGUSR2));
            {
                let _inner = SignalMask::block(&[Signal::SIGUSR2]);
                assert!(is_blocked(Signal::SIGUSR2));
            }
            assert!(is_blocked(Signal::SIGUSR2), "inner guard must not unblock");
        }
        assert!(!is_blocked(Signal::SIGUSR2));
    }

    #[test]
    fn test_exec_resets_every_signal_the_runtime_ignores() {
        assert!(EXEC_DEFAULT_SIGNALS.contains(&Signal::SIGPIPE));
        for sig in &JOB_CONTROL_SIGNALS {
            assert!(!EXEC_DEFAULT_SIGNALS.contains(sig), "{:?} listed twice", sig);
        }
    }
}
