//! Pipeline launcher: turns a parsed [`Pipeline`] into a process group.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::process::ExitStatus;

use failure::{Fail, ResultExt};
use log::{debug, warn};
use nix::{
    errno::Errno,
    fcntl::{self, OFlag},
    libc,
    sys::{
        signal::{self, Signal},
        stat::Mode,
        wait,
    },
    unistd::{self, ForkResult, Pid},
};

use crate::{
    core::job::{Command, Job, ProcessId},
    core::pipeline::{OutputRedirect, Pipeline},
    errors::{Error, ErrorKind, Result},
    shell::{
        job_control::JobManager,
        signals::{self, SignalMask},
        terminal::Terminal,
    },
};

const COMMAND_NOT_FOUND_EXIT_STATUS: i32 = 127;
const COMMAND_NOT_EXECUTABLE_EXIT_STATUS: i32 = 126;
const REDIRECT_FAILED_EXIT_STATUS: i32 = 1;

/// Both ends of one pipe between adjacent stages. An end is `None` once this
/// process has no further use for it.
#[derive(Debug)]
struct Pipe {
    read: Option<File>,
    write: Option<File>,
}

/// Launches every stage of `pipeline` in one new process group and registers
/// the job.
///
/// A background job is announced as `[jid] pgrp` and `Ok(None)` is returned
/// right away. A foreground job is waited on until it stops or completes.
pub fn launch_pipeline(
    manager: &mut JobManager,
    pipeline: &Pipeline,
) -> Result<Option<ExitStatus>> {
    let argvs = pipeline
        .commands
        .iter()
        .map(|argv| to_cstrings(argv))
        .collect::<Result<Vec<_>>>()?;

    let job_id = {
        let _mask = SignalMask::child_status();

        let job_id = manager.table_mut().allocate_id();
        let commands = pipeline
            .commands
            .iter()
            .map(|argv| Command::new(argv.as_slice()))
            .collect();
        let mut job = Job::new(job_id, commands, pipeline.background);

        let mut pipes = (1..argvs.len())
            .map(|_| create_pipe())
            .collect::<Result<Vec<_>>>()?;

        // buffered output would otherwise be written once per child
        let temp_result = io::stdout().flush();
        log_if_err!(temp_result, "failed to flush stdout before fork");

        for (index, argv) in argvs.iter().enumerate() {
            let stage = Stage {
                index,
                count: argvs.len(),
                argv,
                pipeline,
                pgrp: job.pgrp(),
            };

            match unsafe { unistd::fork() } {
                Ok(ForkResult::Child) => stage.exec(manager.terminal(), &mut pipes),
                Ok(ForkResult::Parent { child }) => {
                    debug!(
                        "forked [{}] stage {} as {}: {}",
                        job_id,
                        index,
                        child,
                        argv_text(argv)
                    );
                    let pid = ProcessId::from(child);
                    job.commands_mut()[index].set_pid(pid);
                    if job.pgrp().is_none() {
                        job.set_pgrp(pid);
                    }
                    if let Some(pgrp) = job.pgrp() {
                        set_child_pgrp(child, pgrp);
                    }

                    // the parent keeps only the read end feeding the next stage
                    if index > 0 {
                        pipes[index - 1].read.take();
                    }
                    if let Some(pipe) = pipes.get_mut(index) {
                        pipe.write.take();
                    }
                }
                Err(e) => {
                    abandon_job(&mut job);
                    return Err(e.context(ErrorKind::Nix).into());
                }
            }
        }

        if pipeline.background {
            if let Some(pgrp) = job.pgrp() {
                println!("[{}] {}", job_id, pgrp);
            }
        }
        manager.table_mut().insert(job);
        job_id
    };

    if pipeline.background {
        Ok(None)
    } else {
        manager.wait_in_foreground(job_id)
    }
}

/// One stage, as seen by the child that is about to become it.
struct Stage<'a> {
    index: usize,
    count: usize,
    argv: &'a [CString],
    pipeline: &'a Pipeline,
    pgrp: Option<ProcessId>,
}

impl<'a> Stage<'a> {
    fn is_first(&self) -> bool {
        self.index == 0
    }

    fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }

    /// Runs in the forked child. Never returns to shell code.
    fn exec(self, terminal: &Terminal, pipes: &mut Vec<Pipe>) -> ! {
        let pid = unistd::getpid();
        let pgrp = self.pgrp.map(Pid::from).unwrap_or(pid);
        // the parent makes the same call; whichever runs second is a no-op
        let _ = unistd::setpgid(pid, pgrp);
        if !self.pipeline.background {
            let _ = terminal.try_give_terminal_to(pgrp, None);
        }

        if let Err(e) = signals::reset_for_exec() {
            child_exit(&format!("jcsh: signals: {}", e), REDIRECT_FAILED_EXIT_STATUS);
        }

        if self.is_first() {
            if let Some(ref path) = self.pipeline.stdin {
                redirect_from_file(path, OFlag::O_RDONLY, libc::STDIN_FILENO);
            }
        } else if let Some(ref read) = pipes[self.index - 1].read {
            redirect_fd(read.as_raw_fd(), libc::STDIN_FILENO);
        }

        if self.is_last() {
            if let Some(ref redirect) = self.pipeline.stdout {
                redirect_from_file(&redirect.path, output_flags(redirect), libc::STDOUT_FILENO);
            }
        } else if let Some(ref write) = pipes[self.index].write {
            redirect_fd(write.as_raw_fd(), libc::STDOUT_FILENO);
        }

        // every pipe end this stage holds is now either duplicated or unused
        pipes.clear();

        let program = &self.argv[0];
        let err = match unistd::execvp(program, self.argv) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        let name = program.to_string_lossy();
        if err == Errno::ENOENT {
            child_exit(
                &format!("jcsh: {}", Error::command_not_found(&name)),
                COMMAND_NOT_FOUND_EXIT_STATUS,
            );
        }
        child_exit(
            &format!("jcsh: {}: {}", name, err.desc()),
            COMMAND_NOT_EXECUTABLE_EXIT_STATUS,
        );
    }
}

fn output_flags(redirect: &OutputRedirect) -> OFlag {
    let mode = if redirect.append {
        OFlag::O_APPEND
    } else {
        OFlag::O_TRUNC
    };
    OFlag::O_WRONLY | OFlag::O_CREAT | mode
}

fn redirect_from_file(path: &str, flags: OFlag, target: RawFd) {
    match fcntl::open(path, flags, Mode::from_bits_truncate(0o644)) {
        Ok(fd) => {
            if fd != target {
                redirect_fd(fd, target);
                let _ = unistd::close(fd);
            }
        }
        Err(e) => child_exit(
            &format!("jcsh: {}: {}", path, e.desc()),
            REDIRECT_FAILED_EXIT_STATUS,
        ),
    }
}

fn redirect_fd(fd: RawFd, target: RawFd) {
    if fd == target {
        return;
    }
    if let Err(e) = unistd::dup2(fd, target) {
        child_exit(&format!("jcsh: dup2: {}", e), REDIRECT_FAILED_EXIT_STATUS);
    }
}

/// Terminates a forked child without running any of the shell's exit logic.
fn child_exit(message: &str, code: i32) -> ! {
    eprintln!("{}", message);
    unsafe { libc::_exit(code) }
}

fn set_child_pgrp(child: Pid, pgrp: ProcessId) {
    match unistd::setpgid(child, pgrp.into()) {
        // EACCES: the child already exec'd, after joining the group itself
        // ESRCH: the child is already gone
        Ok(()) | Err(Errno::EACCES) | Err(Errno::ESRCH) => {}
        Err(e) => crate::util::fatal("setpgid", e),
    }
}

/// Tears down the stages forked so far after a later fork failed.
fn abandon_job(job: &mut Job) {
    warn!("fork failed, killing partially launched job [{}]", job.id());
    if let Some(pgrp) = job.pgrp() {
        let temp_result = signal::kill(pgrp.as_group(), Signal::SIGKILL);
        log_if_err!(temp_result, "failed to kill pgrp {}", pgrp);
    }
    job.truncate_unforked();
    for command in job.commands() {
        if let Some(pid) = command.pid() {
            let temp_result = wait::waitpid(Pid::from(pid), None);
            log_if_err!(temp_result, "failed to reap {}", pid);
        }
    }
}

/// Wraps `unistd::pipe()` so both ends are owned by RAII structs the moment
/// they exist.
fn create_pipe() -> Result<Pipe> {
    let (read_end_pipe, write_end_pipe) = unistd::pipe().context(ErrorKind::Nix)?;
    // Nothing else owns these descriptors.
    unsafe {
        Ok(Pipe {
            read: Some(File::from_raw_fd(read_end_pipe)),
            write: Some(File::from_raw_fd(write_end_pipe)),
        })
    }
}

fn to_cstrings(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|arg| CString::new(arg.as_bytes()).map_err(|_| Error::syntax("\\0")))
        .collect()
}

fn argv_text(argv: &[CString]) -> String {
    argv.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
