use crate::builtins::{self, prelude::*};

pub struct Jobs;

#[derive(Debug, Deserialize)]
struct JobsArgs {
    flag_l: bool,
    flag_p: bool,
}

impl builtins::BuiltinCommand for Jobs {
    const NAME: &'static str = builtins::JOBS_NAME;

    const HELP: &'static str = "\
Usage: jobs [options]

Display status of jobs.

Lists the active jobs, oldest first.

Options:
    -l      lists the process group in addition to the normal information
    -p      lists the process group only

Exit Status:
Returns success unless an invalid option is given or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let args: JobsArgs = parse_args(
            Self::HELP,
            Self::NAME,
            args.iter().map(|arg| AsRef::<str>::as_ref(arg)),
        )?;
        debug!("{:?}", args);

        for job in shell.job_manager().table().iter() {
            let pgrp = job
                .pgrp()
                .map(|pgrp| pgrp.to_string())
                .unwrap_or_else(|| "-".to_string());
            if args.flag_p {
                writeln!(stdout, "{}", pgrp).context(ErrorKind::Io)?;
            } else if args.flag_l {
                writeln!(
                    stdout,
                    "[{}] {} {} ({})",
                    job.id(),
                    pgrp,
                    job.status(),
                    job.pipeline()
                )
                .context(ErrorKind::Io)?;
            } else {
                writeln!(stdout, "{}", job).context(ErrorKind::Io)?;
            }
        }

        Ok(ExitStatus::from_success())
    }
}

pub struct Fg;

impl builtins::BuiltinCommand for Fg {
    const NAME: &'static str = builtins::FG_NAME;

    const HELP: &'static str = "\
fg: fg [job_spec]
    Move job to the foreground.

    Place the job identified by JOB_SPEC in the foreground, making it
    the current job. If JOB_SPEC is not present, the shell's notion of the
    current job is used.

    Exit Status:
    Status of command placed in foreground or failure if an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let job_spec = parse_job_spec(&Self::usage(), args)?;
        let manager = shell.job_manager_mut();
        let job_id = manager.resolve(job_spec)?;

        if let Some(job) = manager.table().get(job_id) {
            writeln!(stdout, "{}", job.pipeline()).context(ErrorKind::Io)?;
            stdout.flush().context(ErrorKind::Io)?;
        }

        let exit_status = manager.put_job_in_foreground(job_id)?;
        Ok(exit_status.unwrap_or_else(ExitStatus::from_success))
    }
}

pub struct Bg;

impl builtins::BuiltinCommand for Bg {
    const NAME: &'static str = builtins::BG_NAME;

    const HELP: &'static str = "\
bg: bg [job_spec]
    Move a job to the background.

    Place the job identified by JOB_SPEC in the background, as if it
    had been started with `&'. If JOB_SPEC is not present, the shell's notion
    of the current job is used.

    Exit Status:
    Returns success unless job control is not enabled or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let job_spec = parse_job_spec(&Self::usage(), args)?;
        let manager = shell.job_manager_mut();
        let job_id = manager.resolve(job_spec)?;
        manager.put_job_in_background(job_id)?;

        if let Some(job) = manager.table().get(job_id) {
            writeln!(stdout, "[{}]+ {} &", job_id, job.pipeline()).context(ErrorKind::Io)?;
        }
        Ok(ExitStatus::from_success())
    }
}
