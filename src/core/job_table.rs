//! The authoritative registry of jobs that have been launched and not yet
//! fully reaped.

use std::fmt;
use std::process::ExitStatus;

use log::debug;
use nix::sys::wait::WaitStatus;

use crate::core::job::{self, Job, JobId, JobSpec, ProcessId};
use crate::util::JcshExitStatusExt;

/// What applying a wait status did to the table.
#[derive(Debug)]
pub enum JobEvent {
    /// The job moved to `Stopped`.
    Stopped(JobId),
    /// Every stage of the job has exited; it is no longer in the table.
    Completed(Job),
    /// A stage changed state without changing the job's status.
    Updated(JobId),
}

#[derive(Default)]
pub struct JobTable {
    /// Insertion order, most recent last.
    jobs: Vec<Job>,
    next_id: u32,
}

impl JobTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Next job id. The counter starts again at 1 whenever the table is
    /// empty, so ids are only unique among currently tracked jobs.
    pub fn allocate_id(&mut self) -> JobId {
        if self.jobs.is_empty() {
            self.next_id = 1;
        }
        let id = JobId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, job: Job) {
        debug_assert!(self.find(job.id()).is_none(), "duplicate job id");
        debug!("tracking job [{}] pgrp {:?}", job.id(), job.pgrp());
        self.jobs.push(job);
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<Job> {
        self.find(job_id).map(|index| self.jobs.remove(index))
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn get(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id() == job_id)
    }

    pub fn get_mut(&mut self, job_id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id() == job_id)
    }

    /// Resolves a job selector; `None` selects the most recent job.
    pub fn resolve(&self, spec: Option<JobSpec>) -> Option<JobId> {
        match spec.unwrap_or(JobSpec::Current) {
            JobSpec::Current => self.jobs.last().map(Job::id),
            JobSpec::Id(job_id) => self.get(job_id).map(Job::id),
        }
    }

    pub fn has_stopped_jobs(&self) -> bool {
        self.jobs.iter().any(Job::is_stopped)
    }

    /// Applies one reaped child status. Unknown pids are ignored.
    pub fn apply(&mut self, wait_status: WaitStatus) -> Option<JobEvent> {
        let (pid, exit_status) = match wait_status {
            WaitStatus::Exited(pid, code) => {
                debug!("{} exited with {}", pid, code);
                (pid, Some(ExitStatus::from_status(code)))
            }
            WaitStatus::Signaled(pid, signal, _) => {
                debug!("{} terminated by signal {:?}", pid, signal);
                (pid, Some(job::exit_status_for_signal(signal)))
            }
            WaitStatus::Stopped(pid, signal) => {
                debug!("{} was signaled to stop {:?}", pid, signal);
                (pid, None)
            }
            other => {
                debug!("ignoring wait status {:?}", other);
                return None;
            }
        };

        let pid = ProcessId::from(pid);
        let index = match self.jobs.iter().position(|j| j.has_process(pid)) {
            Some(index) => index,
            None => {
                debug!("ignoring status for untracked pid {}", pid);
                return None;
            }
        };

        let job = &mut self.jobs[index];
        let job_id = job.id();
        if let Some(command) = job.find_process_mut(pid) {
            match exit_status {
                Some(status) => command.mark_exited(status),
                None => command.mark_stopped(),
            }
        }

        if exit_status.is_none() {
            if job.mark_stopped() {
                debug!("job [{}] stopped", job_id);
                return Some(JobEvent::Stopped(job_id));
            }
        } else if job.is_completed() {
            debug!("job [{}] completed", job_id);
            return Some(JobEvent::Completed(self.jobs.remove(index)));
        }

        Some(JobEvent::Updated(job_id))
    }

    fn find(&self, job_id: JobId) -> Option<usize> {
        self.jobs.iter().position(|j| j.id() == job_id)
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} jobs\tnext_id: {}", self.jobs.len(), self.next_id)?;
        for job in &self.jobs {
            writeln!(f, "{}", job)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{Command, JobStatus, ProcessState};
    use nix::{sys::signal::Signal, unistd::Pid};

    fn launch(table: &mut JobTable, pids: &[i32], background: bool) -> JobId {
        let id = table.allocate_id();
        let commands = pids
            .iter()
            .map(|&pid| {
                let mut command = Command::new(&["sleep", "100"]);
                command.set_pid(ProcessId::from(pid));
                command
            })
            .collect();
        let mut job = Job::new(id, commands, background);
        job.set_pgrp(ProcessId::from(pids[0]));
        table.insert(job);
        id
    }

    #[test]
    fn test_job_ids_are_sequential() {
        let mut table = JobTable::new();
        assert_eq!(launch(&mut table, &[100], true), JobId(1));
        assert_eq!(launch(&mut table, &[200], true), JobId(2));
        assert_eq!(launch(&mut table, &[300], true), JobId(3));
    }

    #[test]
    fn test_job_ids_restart_when_table_empties() {
        let mut table = JobTable::new();
        for pid in &[100, 200, 300] {
            launch(&mut table, &[*pid], true);
        }
        for pid in &[100, 200, 300] {
            table.apply(WaitStatus::Exited(Pid::from_raw(*pid), 0));
        }
        assert!(table.is_empty());
        assert_eq!(launch(&mut table, &[400], true), JobId(1));
    }

    #[test]
    fn test_job_ids_continue_while_jobs_remain() {
        let mut table = JobTable::new();
        launch(&mut table, &[100], true);
        launch(&mut table, &[200], true);
        table.apply(WaitStatus::Exited(Pid::from_raw(100), 0));
        assert_eq!(launch(&mut table, &[300], true), JobId(3));
    }

    #[test]
    fn test_pipeline_removed_after_last_stage() {
        let mut table = JobTable::new();
        let id = launch(&mut table, &[100, 101, 102], false);

        match table.apply(WaitStatus::Exited(Pid::from_raw(101), 0)) {
            Some(JobEvent::Updated(updated)) => assert_eq!(updated, id),
            other => panic!("unexpected event {:?}", other),
        }
        table.apply(WaitStatus::Signaled(Pid::from_raw(100), Signal::SIGPIPE, false));
        assert_eq!(table.len(), 1);

        match table.apply(WaitStatus::Exited(Pid::from_raw(102), 1)) {
            Some(JobEvent::Completed(job)) => {
                assert_eq!(job.id(), id);
                assert_eq!(job.last_status(), Some(ExitStatus::from_status(1)));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_stop_of_any_stage_stops_job_once() {
        let mut table = JobTable::new();
        let id = launch(&mut table, &[100, 101], false);

        match table.apply(WaitStatus::Stopped(Pid::from_raw(101), Signal::SIGTSTP)) {
            Some(JobEvent::Stopped(stopped)) => assert_eq!(stopped, id),
            other => panic!("unexpected event {:?}", other),
        }
        match table.apply(WaitStatus::Stopped(Pid::from_raw(100), Signal::SIGTSTP)) {
            Some(JobEvent::Updated(_)) => {}
            other => panic!("unexpected event {:?}", other),
        }

        let job = table.get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Stopped);
        assert!(job
            .commands()
            .iter()
            .all(|c| c.state() == ProcessState::Stopped));
    }

    #[test]
    fn test_unknown_pid_is_ignored() {
        let mut table = JobTable::new();
        launch(&mut table, &[100], true);
        assert!(table
            .apply(WaitStatus::Exited(Pid::from_raw(999), 0))
            .is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve() {
        let mut table = JobTable::new();
        assert_eq!(table.resolve(None), None);
        launch(&mut table, &[100], true);
        launch(&mut table, &[200], true);
        assert_eq!(table.resolve(None), Some(JobId(2)));
        assert_eq!(table.resolve(Some(JobSpec::Current)), Some(JobId(2)));
        assert_eq!(table.resolve(Some(JobSpec::Id(JobId(1)))), Some(JobId(1)));
        assert_eq!(table.resolve(Some(JobSpec::Id(JobId(7)))), None);
    }
}
