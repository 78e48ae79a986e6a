use std::path::{Path, PathBuf};
use std::process::{self, ExitStatus};
use std::str::FromStr;

use docopt::Docopt;
use jcsh::errors::{Error, Result};
use jcsh::{JcshExitStatusExt, Shell, ShellConfig};
use log::{debug, error, LevelFilter};
use nix::unistd::Pid;
use serde_derive::Deserialize;

const COMMAND_HISTORY_CAPACITY: usize = 100;
const LOG_FILE_NAME: &str = ".jcsh_log";

const USAGE: &str = "
jcsh.

Usage:
    jcsh [options]
    jcsh [options] -c <command>
    jcsh [options] <file>
    jcsh (-h | --help)
    jcsh --version

Options:
    -h --help              Show this screen.
    --version              Show version.
    -c                     If the -c option is present, then commands are read from the first
                               non-option argument command_string.
    --log=<path>           File to write log to, defaults to ~/.jcsh_log
    --log-level=<level>    Least severe level written to the log [default: debug].
";

/// Docopts input arguments.
#[derive(Debug, Deserialize)]
struct Args {
    arg_command: Option<String>,
    arg_file: Option<String>,
    flag_version: bool,
    flag_c: bool,
    flag_log: Option<String>,
    flag_log_level: String,
}

fn main() {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    init_logger(args.flag_log.as_ref().map(PathBuf::from), &args.flag_log_level);
    debug!("{:?}", args);

    if args.flag_version {
        println!("jcsh version {}", env!("CARGO_PKG_VERSION"));
    } else if args.flag_c || args.arg_file.is_some() {
        execute_from_command_string_or_file(&args);
    } else {
        execute_from_stdin();
    }
}

/// Logging goes to a file only; the terminal belongs to the shell's jobs.
fn init_logger(path: Option<PathBuf>, level: &str) {
    let log_path = match path.or_else(default_log_path) {
        Some(log_path) => log_path,
        None => {
            eprintln!("jcsh: unable to find home directory, logging disabled");
            return;
        }
    };

    let level = LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("jcsh: invalid log level {:?}, using debug", level);
        LevelFilter::Debug
    });

    let log_file = match fern::log_file(&log_path) {
        Ok(log_file) => log_file,
        Err(e) => {
            eprintln!(
                "jcsh: failed to open log file {}: {}, logging disabled",
                log_path.display(),
                e
            );
            return;
        }
    };

    let pid = Pid::this();
    let result = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                pid,
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(log_file)
        .apply();
    if let Err(e) = result {
        eprintln!("jcsh: failed to install logger: {}", e);
    }
}

fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(LOG_FILE_NAME))
}

fn execute_from_command_string_or_file(args: &Args) -> ! {
    let shell_config = ShellConfig::noninteractive();
    let mut shell = Shell::new(shell_config).unwrap_or_else(|e| display_error_and_exit(&e));

    let result = if let Some(ref command) = args.arg_command {
        shell.execute_command_string(command)
    } else if let Some(ref file_path) = args.arg_file {
        shell.execute_commands_from_file(Path::new(file_path))
    } else {
        Ok(())
    };

    exit(result, &mut shell);
}

fn execute_from_stdin() -> ! {
    let shell_config = ShellConfig::interactive(COMMAND_HISTORY_CAPACITY);
    let mut shell = Shell::new(shell_config).unwrap_or_else(|e| display_error_and_exit(&e));
    shell.execute_from_stdin();
    shell.exit(None)
}

fn display_error_and_exit(error: &Error) -> ! {
    error!("failed to create shell: {}", error);
    eprintln!("jcsh: {}", error);
    process::exit(ExitStatus::from_failure().code().unwrap_or(1));
}

fn exit(result: Result<()>, shell: &mut Shell) -> ! {
    if let Err(e) = result {
        error!("{}", e);
        eprintln!("jcsh: {}", e);
        shell.exit(Some(ExitStatus::from_failure()));
    } else {
        shell.exit(None);
    }
}
