//! Ownership of the controlling terminal.
//!
//! Every change of the terminal's foreground process group goes through
//! [`Terminal`]. When the shell has no terminal to control (stdin is not a
//! tty, or grabbing it failed) the handoffs are no-ops.

use std::os::unix::io::RawFd;

use failure::{Fail, ResultExt};
use log::{debug, warn};
use nix::{
    errno::Errno,
    libc,
    sys::{
        signal::{self, Signal},
        termios::{self, SetArg, Termios},
    },
    unistd::{self, Pid},
};

use crate::errors::{ErrorKind, Result};
use crate::shell::signals::{self, SignalMask};
use crate::util;

#[derive(Debug)]
pub struct Terminal {
    fd: RawFd,
    enabled: bool,
    shell_pgrp: Pid,
    shell_tmodes: Option<Termios>,
    /// Foreground group when the shell started, given the terminal back on exit.
    original_pgrp: Option<Pid>,
}

impl Terminal {
    /// A terminal controller that never touches the terminal.
    pub fn detached() -> Terminal {
        Terminal {
            fd: util::get_terminal(),
            enabled: false,
            shell_pgrp: unistd::getpgrp(),
            shell_tmodes: None,
            original_pgrp: None,
        }
    }

    /// Makes the shell a job-control shell on stdin's terminal: waits until
    /// it is in the foreground, ignores the job-control signals, moves into
    /// its own process group and takes the terminal.
    pub fn acquire() -> Result<Terminal> {
        let fd = util::get_terminal();

        // Loop until the shell is in the foreground
        let original_pgrp = loop {
            let shell_pgrp = unistd::getpgrp();
            if unistd::tcgetpgrp(fd).context(ErrorKind::Nix)? == shell_pgrp {
                break shell_pgrp;
            }
            signal::kill(
                Pid::from_raw(-libc::pid_t::from(shell_pgrp)),
                Signal::SIGTTIN,
            )
            .context(ErrorKind::Nix)?;
        };

        signals::ignore_job_control_signals()?;

        // Put ourselves in our own process group
        let shell_pgrp = Pid::this();
        if let Err(e) = unistd::setpgid(shell_pgrp, shell_pgrp) {
            // a session leader already leads its own group
            if e != Errno::EPERM {
                return Err(e.context(ErrorKind::Nix).into());
            }
        }

        let terminal = Terminal {
            fd,
            enabled: true,
            shell_pgrp: unistd::getpgrp(),
            shell_tmodes: termios::tcgetattr(fd).ok(),
            original_pgrp: Some(original_pgrp),
        };
        terminal.try_give_terminal_to(terminal.shell_pgrp, None)?;
        debug!("acquired terminal for pgrp {}", terminal.shell_pgrp);
        Ok(terminal)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn shell_pgrp(&self) -> Pid {
        self.shell_pgrp
    }

    /// Hands the terminal to `pgrp`, then restores `tmodes` if given.
    ///
    /// SIGTTOU is blocked around the reassignment so a caller outside the
    /// foreground group is not stopped by it. A missing terminal is not an
    /// error.
    pub fn try_give_terminal_to(&self, pgrp: Pid, tmodes: Option<&Termios>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        {
            let _mask = SignalMask::block(&[Signal::SIGTTOU]);
            match unistd::tcsetpgrp(self.fd, pgrp) {
                Ok(()) => {}
                Err(Errno::ENOTTY) => {
                    warn!("tcsetpgrp: shell has no controlling terminal");
                    return Ok(());
                }
                Err(e) => return Err(e.context(ErrorKind::Nix).into()),
            }
        }

        if let Some(tmodes) = tmodes {
            let temp_result = termios::tcsetattr(self.fd, SetArg::TCSADRAIN, tmodes);
            log_if_err!(temp_result, "error restoring terminal modes for pgrp {}", pgrp);
        }
        Ok(())
    }

    /// [`Terminal::try_give_terminal_to`], treating failure as fatal.
    pub fn give_terminal_to(&self, pgrp: Pid, tmodes: Option<&Termios>) {
        debug!("giving terminal to pgrp {}", pgrp);
        if let Err(e) = self.try_give_terminal_to(pgrp, tmodes) {
            util::fatal("tcsetpgrp", e);
        }
    }

    /// Puts the shell back in the foreground with its own terminal modes.
    pub fn reclaim(&self) {
        if self.enabled {
            self.give_terminal_to(self.shell_pgrp, self.shell_tmodes.as_ref());
        }
    }

    /// Returns the terminal to the group that owned it before the shell
    /// took it, if the shell had to leave that group.
    pub fn release(&self) {
        match self.original_pgrp {
            Some(pgrp) if self.enabled && pgrp != self.shell_pgrp => {
                let temp_result = self.try_give_terminal_to(pgrp, self.shell_tmodes.as_ref());
                log_if_err!(temp_result, "failed to return terminal to pgrp {}", pgrp);
            }
            _ => {}
        }
    }

    /// Snapshot of the current terminal modes, e.g. of a job that just stopped.
    pub fn save_modes(&self) -> Option<Termios> {
        if self.enabled {
            termios::tcgetattr(self.fd).ok()
        } else {
            None
        }
    }
}

/// RAII guard: the terminal belongs to a job's process group until dropped,
/// then returns to the shell.
#[derive(Debug)]
pub struct ForegroundTerminal<'a> {
    terminal: &'a Terminal,
}

impl<'a> ForegroundTerminal<'a> {
    pub fn new(terminal: &'a Terminal, pgrp: Pid, tmodes: Option<&Termios>) -> Self {
        terminal.give_terminal_to(pgrp, tmodes);
        ForegroundTerminal { terminal }
    }
}

impl<'a> Drop for ForegroundTerminal<'a> {
    fn drop(&mut self) {
        debug!("putting shell back into foreground and restoring shell's terminal modes");
        self.terminal.reclaim();
    }
}
