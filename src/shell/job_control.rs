//! Reaping and job-control operations on the job table.
//!
//! The [`JobManager`] is the only place that calls `waitpid(2)`. It collects
//! child status changes in two ways:
//!
//! - synchronously, for a job that owns the terminal ([`JobManager::wait_in_foreground`])
//! - by draining every pending status without blocking, whenever the SIGCHLD
//!   flag is raised ([`JobManager::reap_pending`])
//!
//! Both paths apply statuses through [`JobTable::apply`].

use std::fmt;
use std::process::ExitStatus;

use failure::ResultExt;
use log::{debug, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};

use crate::core::job::{self, Job, JobId, JobSpec, JobStatus, ProcessId};
use crate::core::job_table::{JobEvent, JobTable};
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::signals::{self, SignalMask};
use crate::shell::terminal::{ForegroundTerminal, Terminal};
use crate::util;

pub struct JobManager {
    table: JobTable,
    terminal: Terminal,
    /// Announce background jobs that finish.
    notify_completed: bool,
}

impl JobManager {
    pub fn new(terminal: Terminal, notify_completed: bool) -> Self {
        Self {
            table: JobTable::new(),
            terminal,
            notify_completed,
        }
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut JobTable {
        &mut self.table
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    /// Resolves a job selector to a tracked job; `None` is the current job.
    pub fn resolve(&self, spec: Option<JobSpec>) -> Result<JobId> {
        self.table.resolve(spec).ok_or_else(|| match spec {
            Some(JobSpec::Id(job_id)) => Error::no_such_job(format!("%{}", job_id)),
            _ => Error::no_such_job("current"),
        })
    }

    /// Gives a freshly launched or resumed job the terminal and blocks until
    /// it stops or every stage has exited. The shell owns the terminal again
    /// when this returns.
    pub fn wait_in_foreground(&mut self, job_id: JobId) -> Result<Option<ExitStatus>> {
        let (pgrp, tmodes) = {
            let job = self
                .table
                .get(job_id)
                .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;
            (job.pgrp(), job.tmodes().cloned())
        };

        let JobManager {
            table, terminal, ..
        } = self;
        let terminal = &*terminal;
        let _foreground =
            pgrp.map(|pgrp| ForegroundTerminal::new(terminal, pgrp.into(), tmodes.as_ref()));
        wait_for_job(table, terminal, job_id)
    }

    /// Continues a stopped or background job in the foreground.
    pub fn put_job_in_foreground(&mut self, job_id: JobId) -> Result<Option<ExitStatus>> {
        let _mask = SignalMask::child_status();
        debug!("putting job [{}] in foreground", job_id);

        let pgrp = {
            let job = self
                .table
                .get_mut(job_id)
                .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;
            job.mark_foreground();
            job.pgrp()
        };

        let JobManager {
            table, terminal, ..
        } = self;
        let terminal = &*terminal;
        let tmodes = table.get(job_id).and_then(|j| j.tmodes().cloned());
        let _foreground = match pgrp {
            Some(pgrp) => {
                let foreground = ForegroundTerminal::new(terminal, pgrp.into(), tmodes.as_ref());
                send_signal(pgrp, Signal::SIGCONT)?;
                Some(foreground)
            }
            None => None,
        };

        wait_for_job(table, terminal, job_id)
    }

    /// Continues a stopped job in the background. A job that is already
    /// running is left alone.
    pub fn put_job_in_background(&mut self, job_id: JobId) -> Result<()> {
        let _mask = SignalMask::child_status();
        debug!("putting job [{}] in background", job_id);

        let job = self
            .table
            .get_mut(job_id)
            .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;
        if job.mark_background() {
            if let Some(pgrp) = job.pgrp() {
                send_signal(pgrp, Signal::SIGCONT)?;
            }
        }
        Ok(())
    }

    /// Sends SIGTERM to the job's process group. The job leaves the table
    /// once the reaper sees every stage die.
    pub fn kill_job(&mut self, job_id: JobId) -> Result<()> {
        let job = self
            .table
            .get(job_id)
            .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;
        if let Some(pgrp) = job.pgrp() {
            send_signal(pgrp, Signal::SIGTERM)?;
            if job.is_stopped() {
                // stopped processes only act on SIGTERM once continued
                send_signal(pgrp, Signal::SIGCONT)?;
            }
        }
        Ok(())
    }

    /// Sends SIGSTOP to the job's process group. The job becomes `Stopped`
    /// when the reaper observes it.
    pub fn stop_job(&mut self, job_id: JobId) -> Result<()> {
        let job = self
            .table
            .get(job_id)
            .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;
        if let Some(pgrp) = job.pgrp() {
            send_signal(pgrp, Signal::SIGSTOP)?;
        }
        Ok(())
    }

    /// Drains every pending child status without blocking, if a SIGCHLD
    /// arrived since the last drain.
    pub fn reap_pending(&mut self) {
        if !signals::take_child_status_pending() {
            return;
        }

        loop {
            let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG;
            match wait::waitpid(Pid::from_raw(-1), Some(flags)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(status) => {
                    if let Some(event) = self.table.apply(status) {
                        self.notify(event);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => util::fatal("waitpid", e),
            }
        }
    }

    fn notify(&mut self, event: JobEvent) {
        match event {
            JobEvent::Stopped(job_id) => {
                if let Some(job) = self.table.get_mut(job_id) {
                    if !job.notified_stopped() {
                        println!("{}", job.stopped_banner());
                        job.set_notified_stopped();
                    }
                }
            }
            JobEvent::Completed(job) => {
                if let Some(banner) = completion_banner(&job, self.notify_completed) {
                    println!("{}", banner);
                }
            }
            JobEvent::Updated(_) => {}
        }
    }
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.table)
    }
}

/// The `Done` notice for a job that finished while running in the
/// background, whether it was launched with `&` or resumed with `bg`.
fn completion_banner(job: &Job, notify_completed: bool) -> Option<String> {
    if notify_completed && job.status() == JobStatus::Background {
        Some(job.done_banner())
    } else {
        None
    }
}

/// Collects status changes from the job's process group until the job has
/// stopped or all of its stages are gone.
///
/// The status of a job that stopped is `128 + SIGTSTP`.
fn wait_for_job(
    table: &mut JobTable,
    terminal: &Terminal,
    job_id: JobId,
) -> Result<Option<ExitStatus>> {
    let mut last_status = None;

    loop {
        let pgrp = match table.get(job_id) {
            Some(job) if job.is_stopped() => break,
            Some(job) => match job.pgrp() {
                Some(pgrp) => pgrp,
                None => break,
            },
            None => break,
        };

        let wait_status = match wait::waitpid(pgrp.as_group(), Some(WaitPidFlag::WUNTRACED)) {
            Ok(wait_status) => wait_status,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                warn!("job [{}] has no children left to wait for", job_id);
                if let Some(job) = table.remove(job_id) {
                    last_status = job.last_status();
                }
                break;
            }
            Err(e) => util::fatal("waitpid", e),
        };

        match table.apply(wait_status) {
            Some(JobEvent::Stopped(stopped)) => {
                if let Some(job) = table.get_mut(stopped) {
                    job.set_tmodes(terminal.save_modes());
                    println!("{}", job.stopped_banner());
                    job.set_notified_stopped();
                }
                last_status = Some(job::exit_status_for_signal(Signal::SIGTSTP));
            }
            Some(JobEvent::Completed(job)) => last_status = job.last_status(),
            Some(JobEvent::Updated(_)) | None => {}
        }
    }

    Ok(last_status)
}

fn send_signal(pgrp: ProcessId, sig: Signal) -> Result<()> {
    debug!("sending {:?} to pgrp {}", sig, pgrp);
    signal::kill(pgrp.as_group(), sig).context(ErrorKind::Nix)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::Command;

    fn job(background: bool) -> Job {
        Job::new(JobId(1), vec![Command::new(&["sleep", "1"])], background)
    }

    #[test]
    fn test_background_job_completion_is_announced() {
        assert_eq!(
            completion_banner(&job(true), true),
            Some("[1] Done (sleep 1)".to_string())
        );
        assert_eq!(completion_banner(&job(true), false), None);
    }

    #[test]
    fn test_job_resumed_with_bg_is_announced() {
        let mut job = job(false);
        assert_eq!(completion_banner(&job, true), None);
        job.mark_stopped();
        assert_eq!(completion_banner(&job, true), None);
        job.mark_background();
        assert_eq!(
            completion_banner(&job, true),
            Some("[1] Done (sleep 1)".to_string())
        );
    }

    #[test]
    fn test_job_brought_to_foreground_is_not_announced() {
        let mut job = job(true);
        job.mark_foreground();
        assert_eq!(completion_banner(&job, true), None);
    }
}
