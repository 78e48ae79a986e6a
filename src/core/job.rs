use std::{fmt, process::ExitStatus};

use nix::{libc, sys::signal::Signal, sys::termios::Termios, unistd::Pid};

use crate::util::JcshExitStatusExt;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProcessId(libc::pid_t);

impl ProcessId {
    /// Process id in the negative form `kill(2)` uses to address a whole group.
    pub fn as_group(self) -> Pid {
        Pid::from_raw(-self.0)
    }
}

impl From<Pid> for ProcessId {
    fn from(value: Pid) -> Self {
        ProcessId(value.as_raw())
    }
}

impl From<libc::pid_t> for ProcessId {
    fn from(value: libc::pid_t) -> Self {
        ProcessId(value)
    }
}

impl From<ProcessId> for Pid {
    fn from(value: ProcessId) -> Self {
        Pid::from_raw(value.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProcessState {
    Running,
    Stopped,
    Exited(ExitStatus),
}

/// One stage of a pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    argv: Vec<String>,
    /// `None` until the stage has been forked
    pid: Option<ProcessId>,
    state: ProcessState,
}

impl Command {
    pub fn new<S: AsRef<str>>(argv: &[S]) -> Self {
        debug_assert!(!argv.is_empty(), "a command needs a program name");
        Self {
            argv: argv.iter().map(|arg| arg.as_ref().to_string()).collect(),
            pid: None,
            state: ProcessState::Running,
        }
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    /// # Panics
    /// Panics in debug builds if the pid was already set.
    pub fn set_pid(&mut self, pid: ProcessId) {
        debug_assert!(self.pid.is_none(), "pid is assigned once");
        self.pid = Some(pid);
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_exited(&self) -> bool {
        match self.state {
            ProcessState::Exited(_) => true,
            _ => false,
        }
    }

    pub fn mark_exited(&mut self, status: ExitStatus) {
        self.state = ProcessState::Exited(status);
    }

    pub fn mark_stopped(&mut self) {
        if !self.is_exited() {
            self.state = ProcessState::Stopped;
        }
    }

    pub fn mark_running(&mut self) {
        if !self.is_exited() {
            self.state = ProcessState::Running;
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Foreground,
    Background,
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            JobStatus::Foreground => write!(f, "Foreground"),
            JobStatus::Background => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A launched pipeline tracked for job control.
///
/// Status changes only through the `mark_*` transitions; each returns `false`
/// and leaves the job untouched when the edge does not exist from the
/// current status.
#[derive(Clone, Debug)]
pub struct Job {
    id: JobId,
    pgrp: Option<ProcessId>,
    commands: Vec<Command>,
    status: JobStatus,
    /// Terminal modes saved when the job last stopped in the foreground.
    tmodes: Option<Termios>,
    notified_stopped: bool,
}

impl Job {
    pub fn new(id: JobId, commands: Vec<Command>, background: bool) -> Self {
        Self {
            id,
            pgrp: None,
            commands,
            status: if background {
                JobStatus::Background
            } else {
                JobStatus::Foreground
            },
            tmodes: None,
            notified_stopped: false,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pgrp(&self) -> Option<ProcessId> {
        self.pgrp
    }

    /// # Panics
    /// Panics in debug builds if the process group was already assigned.
    pub fn set_pgrp(&mut self, pgrp: ProcessId) {
        debug_assert!(self.pgrp.is_none(), "pgrp is assigned once");
        self.pgrp = Some(pgrp);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut [Command] {
        &mut self.commands
    }

    /// Drops the stages that were never forked.
    pub fn truncate_unforked(&mut self) {
        self.commands.retain(|c| c.pid().is_some());
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn tmodes(&self) -> Option<&Termios> {
        self.tmodes.as_ref()
    }

    pub fn set_tmodes(&mut self, tmodes: Option<Termios>) {
        self.tmodes = tmodes;
    }

    pub fn is_stopped(&self) -> bool {
        self.status == JobStatus::Stopped
    }

    /// A job is complete once every stage has exited or died.
    pub fn is_completed(&self) -> bool {
        self.commands.iter().all(Command::is_exited)
    }

    pub fn has_process(&self, pid: ProcessId) -> bool {
        self.commands.iter().any(|c| c.pid() == Some(pid))
    }

    pub fn find_process_mut(&mut self, pid: ProcessId) -> Option<&mut Command> {
        self.commands.iter_mut().find(|c| c.pid() == Some(pid))
    }

    /// Exit status of the pipeline, i.e. of its last stage.
    pub fn last_status(&self) -> Option<ExitStatus> {
        match self.commands.last().map(Command::state) {
            Some(ProcessState::Exited(status)) => Some(status),
            _ => None,
        }
    }

    /// `Foreground` or `Background` to `Stopped`.
    pub fn mark_stopped(&mut self) -> bool {
        match self.status {
            JobStatus::Stopped => false,
            JobStatus::Foreground | JobStatus::Background => {
                self.status = JobStatus::Stopped;
                self.notified_stopped = false;
                true
            }
        }
    }

    /// `Stopped` to `Background`.
    pub fn mark_background(&mut self) -> bool {
        match self.status {
            JobStatus::Stopped => {
                self.status = JobStatus::Background;
                self.resume();
                true
            }
            JobStatus::Foreground | JobStatus::Background => false,
        }
    }

    /// `Background` or `Stopped` to `Foreground`.
    pub fn mark_foreground(&mut self) -> bool {
        match self.status {
            JobStatus::Foreground => false,
            JobStatus::Background | JobStatus::Stopped => {
                self.status = JobStatus::Foreground;
                self.resume();
                true
            }
        }
    }

    pub fn notified_stopped(&self) -> bool {
        self.notified_stopped
    }

    pub fn set_notified_stopped(&mut self) {
        self.notified_stopped = true;
    }

    /// The pipeline as the user would retype it: `cmd1 | cmd2`.
    pub fn pipeline(&self) -> String {
        self.commands
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    pub fn stopped_banner(&self) -> String {
        format!("[{}]+ Stopped ({})", self.id, self.pipeline())
    }

    pub fn done_banner(&self) -> String {
        format!("[{}] Done ({})", self.id, self.pipeline())
    }

    fn resume(&mut self) {
        for command in &mut self.commands {
            command.mark_running();
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.id, self.status, self.pipeline())
    }
}

/// Job selector accepted by `fg`, `bg`, `kill` and `stop`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobSpec {
    /// The most recently inserted job.
    Current,
    Id(JobId),
}

impl JobSpec {
    /// Parses `%N`, bare `N`, `%%` or `%+`.
    pub fn parse(spec: &str) -> Option<JobSpec> {
        match spec {
            "%%" | "%+" => return Some(JobSpec::Current),
            _ => {}
        }

        let digits = if spec.starts_with('%') {
            &spec[1..]
        } else {
            spec
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match digits.parse::<u32>() {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(JobSpec::Id(JobId(n))),
        }
    }
}

pub fn exit_status_for_signal(signal: Signal) -> ExitStatus {
    ExitStatus::from_status(128 + signal as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_pids(pids: &[libc::pid_t]) -> Job {
        let commands = pids
            .iter()
            .map(|&pid| {
                let mut command = Command::new(&["cmd", "arg1"]);
                command.set_pid(ProcessId(pid));
                command
            })
            .collect();
        Job::new(JobId(1), commands, false)
    }

    #[test]
    fn test_new_command() {
        let command = Command::new(&["cmd", "arg1"]);
        assert_eq!(command.to_string(), "cmd arg1");
        assert_eq!(command.pid(), None);
        assert_eq!(command.state(), ProcessState::Running);
    }

    #[test]
    fn test_exited_command_stays_exited() {
        let mut command = Command::new(&["cmd"]);
        command.mark_exited(ExitStatus::from_status(3));
        command.mark_running();
        command.mark_stopped();
        assert_eq!(
            command.state(),
            ProcessState::Exited(ExitStatus::from_status(3))
        );
    }

    #[test]
    fn test_job_initial_status() {
        assert_eq!(
            Job::new(JobId(1), vec![Command::new(&["a"])], true).status(),
            JobStatus::Background
        );
        assert_eq!(
            Job::new(JobId(1), vec![Command::new(&["a"])], false).status(),
            JobStatus::Foreground
        );
    }

    #[test]
    fn test_job_transitions() {
        let mut job = job_with_pids(&[10]);
        assert!(!job.mark_background(), "foreground -> background is not an edge");
        assert!(job.mark_stopped());
        assert!(!job.mark_stopped(), "stopped -> stopped is a no-op");
        assert!(job.mark_background());
        assert_eq!(job.status(), JobStatus::Background);
        assert!(job.mark_foreground());
        assert!(!job.mark_foreground());
        assert_eq!(job.status(), JobStatus::Foreground);
    }

    #[test]
    fn test_resuming_marks_live_stages_running() {
        let mut job = job_with_pids(&[10, 11]);
        job.commands_mut()[0].mark_exited(ExitStatus::from_success());
        job.commands_mut()[1].mark_stopped();
        job.mark_stopped();
        job.mark_background();
        assert!(job.commands()[0].is_exited());
        assert_eq!(job.commands()[1].state(), ProcessState::Running);
    }

    #[test]
    fn test_job_completed_requires_every_stage() {
        let mut job = job_with_pids(&[10, 11]);
        job.find_process_mut(ProcessId(10))
            .unwrap()
            .mark_exited(ExitStatus::from_success());
        assert!(!job.is_completed());
        job.find_process_mut(ProcessId(11))
            .unwrap()
            .mark_exited(ExitStatus::from_status(4));
        assert!(job.is_completed());
        assert_eq!(job.last_status(), Some(ExitStatus::from_status(4)));
    }

    #[test]
    fn test_job_display() {
        let commands = vec![
            Command::new(&["printf", "a"]),
            Command::new(&["grep", "b"]),
        ];
        let mut job = Job::new(JobId(2), commands, true);
        assert_eq!(job.to_string(), "[2] Running (printf a | grep b)");
        job.mark_stopped();
        assert_eq!(job.to_string(), "[2] Stopped (printf a | grep b)");
        assert_eq!(job.stopped_banner(), "[2]+ Stopped (printf a | grep b)");
        assert_eq!(job.done_banner(), "[2] Done (printf a | grep b)");
    }

    #[test]
    fn test_job_spec_parse() {
        assert_eq!(JobSpec::parse("%1"), Some(JobSpec::Id(JobId(1))));
        assert_eq!(JobSpec::parse("12"), Some(JobSpec::Id(JobId(12))));
        assert_eq!(JobSpec::parse("%%"), Some(JobSpec::Current));
        assert_eq!(JobSpec::parse("%+"), Some(JobSpec::Current));
        assert_eq!(JobSpec::parse("%0"), None);
        assert_eq!(JobSpec::parse("%abc"), None);
        assert_eq!(JobSpec::parse("%"), None);
        assert_eq!(JobSpec::parse("-1"), None);
        assert_eq!(JobSpec::parse("+1"), None);
        assert_eq!(JobSpec::parse("%+1"), None);
        assert_eq!(JobSpec::parse("% 1"), None);
    }

    #[test]
    fn test_exit_status_for_signal() {
        assert_eq!(
            exit_status_for_signal(Signal::SIGTERM).code(),
            Some(128 + 15)
        );
    }
}
