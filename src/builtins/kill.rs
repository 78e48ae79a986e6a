use crate::builtins::{self, prelude::*};

pub struct Kill;

impl builtins::BuiltinCommand for Kill {
    const NAME: &'static str = builtins::KILL_NAME;

    const HELP: &'static str = "\
kill: kill [job_spec]
    Terminate a job.

    Send SIGTERM to the process group of the job identified by JOB_SPEC,
    or of the current job. A stopped job is also continued so that it can
    act on the signal. The job leaves the job table once every process in
    it has exited.

    Exit Status:
    Returns success unless the job does not exist or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let job_spec = parse_job_spec(&Self::usage(), args)?;
        let manager = shell.job_manager_mut();
        let job_id = manager.resolve(job_spec)?;
        manager.kill_job(job_id)?;
        Ok(ExitStatus::from_success())
    }
}

pub struct Stop;

impl builtins::BuiltinCommand for Stop {
    const NAME: &'static str = builtins::STOP_NAME;

    const HELP: &'static str = "\
stop: stop [job_spec]
    Suspend a job.

    Send SIGSTOP to the process group of the job identified by JOB_SPEC,
    or of the current job. The job is reported as stopped once the shell
    observes it.

    Exit Status:
    Returns success unless the job does not exist or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let job_spec = parse_job_spec(&Self::usage(), args)?;
        let manager = shell.job_manager_mut();
        let job_id = manager.resolve(job_spec)?;
        manager.stop_job(job_id)?;
        Ok(ExitStatus::from_success())
    }
}
