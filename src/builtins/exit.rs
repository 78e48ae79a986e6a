use crate::builtins::{self, prelude::*};

pub struct Exit;

impl builtins::BuiltinCommand for Exit {
    const NAME: &'static str = builtins::EXIT_NAME;

    const HELP: &'static str = "\
exit: exit [n]
    Exit the shell with a status of N. If N is omitted, the exit status
    is that of the last command executed.

    With stopped jobs, the first exit only warns; a second exit in a row
    leaves the shell anyway.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        if args.len() > 1 {
            return Err(Error::builtin_command("too many arguments", 1));
        }
        if shell.warn_stopped_jobs_on_exit() {
            return Err(Error::builtin_command("There are stopped jobs.", 1));
        }

        let status_code = args
            .get(0)
            .map(|arg| {
                arg.as_ref().parse::<i32>().unwrap_or_else(|_| {
                    eprintln!("jcsh: exit: {}: numeric argument required", arg.as_ref());
                    2
                })
            })
            .map(ExitStatus::from_status);
        shell.exit(status_code);
    }
}
