//! Jcsh builtins
//!
//! The job-control commands run inside the shell process, against its job
//! table and terminal. Where possible they behave like their Bash
//! counterparts.

use std::iter;

use docopt::Docopt;
use failure::ResultExt;
use serde::de::DeserializeOwned;

use self::prelude::*;

use self::exit::Exit;
use self::jobs::{Bg, Fg, Jobs};
use self::kill::{Kill, Stop};

pub mod prelude {
    pub use std::io::Write;
    pub use std::process::ExitStatus;

    pub use failure::ResultExt;
    pub use log::debug;

    pub use super::{parse_args, parse_job_spec};
    pub use crate::{
        errors::{Error, ErrorKind, Result},
        shell::Shell,
        util::JcshExitStatusExt,
    };
}

mod exit;
mod jobs;
mod kill;

const BG_NAME: &str = "bg";
const EXIT_NAME: &str = "exit";
const FG_NAME: &str = "fg";
const JOBS_NAME: &str = "jobs";
const KILL_NAME: &str = "kill";
const STOP_NAME: &str = "stop";

const USAGE_EXIT_STATUS: i32 = 2;

/// Represents a Jcsh builtin command such as fg or jobs.
pub trait BuiltinCommand {
    /// The NAME of the command.
    const NAME: &'static str;
    /// The help string to display to the user.
    const HELP: &'static str;
    /// The usage string to display to the user.
    fn usage() -> String {
        Self::HELP.lines().next().unwrap_or(Self::NAME).to_owned()
    }
    /// Runs the command with the given arguments in the `shell` environment.
    fn run<T: AsRef<str>>(shell: &mut Shell, args: &[T], stdout: &mut dyn Write)
        -> Result<ExitStatus>;
}

pub fn is_builtin<T: AsRef<str>>(program: T) -> bool {
    [
        BG_NAME, EXIT_NAME, FG_NAME, JOBS_NAME, KILL_NAME, STOP_NAME,
    ]
    .contains(&program.as_ref())
}

/// precondition: command is a builtin.
///
/// Errors are reported on stderr as `jcsh: <name>: <error>` and turned into
/// the returned exit status.
pub fn run<S1, S2>(
    shell: &mut Shell,
    program: S1,
    args: &[S2],
    stdout: &mut dyn Write,
) -> ExitStatus
where
    S1: AsRef<str>,
    S2: AsRef<str>,
{
    debug_assert!(is_builtin(&program));

    let result = match program.as_ref() {
        BG_NAME => Bg::run(shell, args, stdout),
        EXIT_NAME => Exit::run(shell, args, stdout),
        FG_NAME => Fg::run(shell, args, stdout),
        JOBS_NAME => Jobs::run(shell, args, stdout),
        KILL_NAME => Kill::run(shell, args, stdout),
        STOP_NAME => Stop::run(shell, args, stdout),
        _ => unreachable!(),
    };

    match result {
        Ok(exit_status) => exit_status,
        Err(e) => {
            debug!("{} failed: {:?}", program.as_ref(), e);
            eprintln!("jcsh: {}: {}", program.as_ref(), e);
            get_builtin_exit_status(&e)
        }
    }
}

fn get_builtin_exit_status(error: &Error) -> ExitStatus {
    let status = match *error.kind() {
        ErrorKind::BuiltinCommand { code, .. } => code,
        ErrorKind::Docopt => USAGE_EXIT_STATUS,
        _ => 1,
    };

    ExitStatus::from_status(status)
}

pub fn parse_args<D, S, I>(usage: &str, program: S, args: I) -> Result<D>
where
    D: DeserializeOwned,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args = Docopt::new(usage)
        .and_then(|d| d.argv(iter::once(program).chain(args)).deserialize())
        .context(ErrorKind::Docopt)?;
    Ok(args)
}

/// Parses the optional single job selector taken by `fg`, `bg`, `kill` and
/// `stop`.
pub fn parse_job_spec<T: AsRef<str>>(
    usage: &str,
    args: &[T],
) -> Result<Option<crate::core::job::JobSpec>> {
    use crate::core::job::JobSpec;

    match args {
        [] => Ok(None),
        [arg] => JobSpec::parse(arg.as_ref())
            .map(Some)
            .ok_or_else(|| Error::no_such_job(arg.as_ref())),
        _ => Err(Error::builtin_command(usage, USAGE_EXIT_STATUS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{JobId, JobSpec};

    #[derive(Debug, Deserialize)]
    struct TestArgs {
        flag_l: bool,
        flag_p: bool,
    }

    const TEST_USAGE: &str = "
Usage: test [options]

Options:
    -l  long
    -p  pgrp
";

    #[test]
    fn test_is_builtin() {
        for name in &["bg", "exit", "fg", "jobs", "kill", "stop"] {
            assert!(is_builtin(name), "{}", name);
        }
        assert!(!is_builtin("sleep"));
        assert!(!is_builtin("cd"));
    }

    #[test]
    fn test_parse_args() {
        let args: TestArgs = parse_args(TEST_USAGE, "test", vec!["-l"]).unwrap();
        assert!(args.flag_l);
        assert!(!args.flag_p);

        let error = parse_args::<TestArgs, _, _>(TEST_USAGE, "test", vec!["-x"]).unwrap_err();
        assert_eq!(*error.kind(), ErrorKind::Docopt);
        assert_eq!(get_builtin_exit_status(&error).code(), Some(2));
    }

    #[test]
    fn test_parse_job_spec() {
        let none: &[&str] = &[];
        assert_eq!(parse_job_spec("usage", none).unwrap(), None);
        assert_eq!(
            parse_job_spec("usage", &["%2"]).unwrap(),
            Some(JobSpec::Id(JobId(2)))
        );
        assert_eq!(
            parse_job_spec("usage", &["%%"]).unwrap(),
            Some(JobSpec::Current)
        );

        let error = parse_job_spec("usage", &["%x"]).unwrap_err();
        assert_eq!(error.to_string(), "%x: no such job");
        assert_eq!(get_builtin_exit_status(&error).code(), Some(1));

        let error = parse_job_spec("usage", &["%1", "%2"]).unwrap_err();
        assert_eq!(get_builtin_exit_status(&error).code(), Some(2));
    }
}
