//! Jcsh - Shell Module
//!
//! The [`Shell`] is the one context object the read-eval loop owns. It hands
//! each pipeline to a builtin or to the launcher, and owns the job manager
//! that tracks everything launched.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{self, ExitStatus};

use atty::{self, Stream};
use failure::ResultExt;
use log::{debug, error, info, warn};

use crate::{
    builtins,
    core::pipeline::Pipeline,
    editor::Editor,
    errors::{ErrorKind, Result},
    execute_command,
    util::{self, JcshExitStatusExt},
};

use self::job_control::JobManager;
use self::terminal::Terminal;

pub mod job_control;
pub mod signals;
pub mod terminal;

const HISTORY_FILE_NAME: &str = ".jcsh_history";
const PROMPT: &str = "jcsh> ";
const SYNTAX_ERROR_EXIT_STATUS: i32 = 2;

/// Jcsh Shell
pub struct Shell {
    /// Responsible for readline and history. Only present when stdin is a
    /// terminal and the shell is interactive.
    editor: Option<Editor>,
    history_file: Option<PathBuf>,
    job_manager: JobManager,
    /// Exit status of last command executed.
    last_exit_status: ExitStatus,
    config: ShellConfig,
    /// Set by an `exit` refused because of stopped jobs; any other command
    /// clears it.
    stopped_jobs_warned: bool,
}

impl Shell {
    /// Constructs a new Shell to manage running jobs and command history.
    pub fn new(config: ShellConfig) -> Result<Shell> {
        signals::install_sigchld_handler()?;

        let is_tty = atty::is(Stream::Stdin);
        let terminal = if is_tty {
            Terminal::acquire().unwrap_or_else(|e| {
                error!(
                    "failed to initialize shell for job control despite isatty: {}",
                    e
                );
                Terminal::detached()
            })
        } else {
            Terminal::detached()
        };

        let editor = if is_tty && config.enable_command_history {
            Some(Editor::with_capacity(config.command_history_capacity))
        } else {
            None
        };

        let mut shell = Shell {
            editor,
            history_file: None,
            job_manager: JobManager::new(terminal, config.display_messages),
            last_exit_status: ExitStatus::from_success(),
            config,
            stopped_jobs_warned: false,
        };

        if shell.editor.is_some() {
            shell.load_history()?;
        }

        info!(
            "jcsh started up, job control {}",
            if shell.job_manager.terminal().is_enabled() {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(shell)
    }

    fn load_history(&mut self) -> Result<()> {
        self.history_file = dirs::home_dir().map(|p| p.join(HISTORY_FILE_NAME));
        match (self.history_file.as_ref(), self.editor.as_mut()) {
            (Some(history_file), Some(editor)) => editor.load_history(history_file)?,
            (None, _) => warn!("unable to get home directory"),
            _ => {}
        }

        Ok(())
    }

    pub fn job_manager(&self) -> &JobManager {
        &self.job_manager
    }

    pub fn job_manager_mut(&mut self) -> &mut JobManager {
        &mut self.job_manager
    }

    /// Returns `true` exactly when `exit` should refuse: there are stopped
    /// jobs and the previous command was not already a refused `exit`.
    pub fn warn_stopped_jobs_on_exit(&mut self) -> bool {
        if self.stopped_jobs_warned || !self.job_manager.table().has_stopped_jobs() {
            return false;
        }
        self.stopped_jobs_warned = true;
        true
    }

    /// Parses and runs one line. Syntax errors are reported and only set the
    /// exit status.
    pub fn execute_command_string(&mut self, input: &str) -> Result<()> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(());
        }

        if self.config.enable_command_history {
            if let Some(ref mut editor) = self.editor {
                editor.add_history_entry(input);
            }
        }

        let pipelines = match Pipeline::parse(input) {
            Ok(pipelines) => pipelines,
            Err(e) => {
                if let ErrorKind::Syntax(_) = *e.kind() {
                    eprintln!("jcsh: {}", e);
                    self.last_exit_status = ExitStatus::from_status(SYNTAX_ERROR_EXIT_STATUS);
                    return Ok(());
                }

                return Err(e);
            }
        };

        for pipeline in &pipelines {
            self.execute_pipeline(pipeline);
        }

        Ok(())
    }

    pub fn execute_commands_from_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path).context(ErrorKind::Io)?;
        for line in contents.lines() {
            self.execute_command_string(line)?;
        }

        Ok(())
    }

    /// The read-eval loop. Returns at end of input.
    pub fn execute_from_stdin(&mut self) {
        let stdin = io::stdin();
        loop {
            // Announce and forget jobs that changed state since the last prompt.
            self.job_manager.reap_pending();
            self.job_manager.terminal().reclaim();

            let line = match self.editor {
                Some(ref mut editor) => editor.readline(PROMPT),
                None => read_line(&mut stdin.lock()),
            };

            let input = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read command: {}", e);
                    eprintln!("jcsh: {}", e);
                    break;
                }
            };

            let temp_result = self.execute_command_string(&input);
            log_if_err!(temp_result, "execute_command_string");
        }
    }

    /// Runs one pipeline and records its exit status.
    fn execute_pipeline(&mut self, pipeline: &Pipeline) {
        self.job_manager.reap_pending();

        let program = &pipeline.commands[0][0];
        if program != "exit" {
            self.stopped_jobs_warned = false;
        }

        self.last_exit_status = if pipeline.is_builtin_candidate() && builtins::is_builtin(program)
        {
            self.run_builtin(pipeline)
        } else {
            match execute_command::launch_pipeline(&mut self.job_manager, pipeline) {
                Ok(exit_status) => exit_status.unwrap_or_else(ExitStatus::from_success),
                Err(e) => {
                    error!("failed to launch pipeline: {}", e);
                    eprintln!("jcsh: {}", e);
                    ExitStatus::from_failure()
                }
            }
        };
        debug!("last exit status: {:?}", self.last_exit_status.code());

        self.job_manager.reap_pending();
    }

    /// Builtins run in the shell process; only output redirection applies.
    fn run_builtin(&mut self, pipeline: &Pipeline) -> ExitStatus {
        let argv = &pipeline.commands[0];
        if pipeline.background {
            debug!("running builtin {} in the foreground", argv[0]);
        }

        match pipeline.stdout {
            Some(ref redirect) => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .append(redirect.append)
                    .truncate(!redirect.append)
                    .open(&redirect.path);
                match file {
                    Ok(mut file) => builtins::run(self, &argv[0], &argv[1..], &mut file),
                    Err(e) => {
                        eprintln!("jcsh: {}: {}", redirect.path, e);
                        ExitStatus::from_failure()
                    }
                }
            }
            None => builtins::run(self, &argv[0], &argv[1..], &mut io::stdout()),
        }
    }

    /// Leaves the shell with status `n`, or the last command's status.
    pub fn exit(&mut self, n: Option<ExitStatus>) -> ! {
        if self.config.display_messages {
            println!("exit");
        }

        let code = n
            .unwrap_or(self.last_exit_status)
            .code()
            .unwrap_or(util::FATAL_EXIT_STATUS);
        let code_like_u8 = if code < 0 {
            (256 + code % 256) % 256
        } else {
            code % 256
        };

        if self.config.enable_command_history {
            if let (Some(editor), Some(history_file)) = (self.editor.as_mut(), &self.history_file)
            {
                if let Err(e) = editor.save_history(history_file) {
                    error!(
                        "error: failed to save history to file during shutdown: {}",
                        e
                    );
                }
            }
        }

        self.job_manager.terminal().release();
        let temp_result = io::stdout().flush();
        log_if_err!(temp_result, "failed to flush stdout");

        info!("jcsh has shut down with status {}", code_like_u8);
        process::exit(code_like_u8);
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}\n{:?}", self.job_manager, self.editor)
    }
}

/// Reads one line from a non-terminal stdin. `None` at end of input.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).context(ErrorKind::Io)?;
    if n == 0 {
        Ok(None)
    } else {
        Ok(Some(line))
    }
}

/// Policy object to control a Shell's behavior
#[derive(Debug, Copy, Clone)]
pub struct ShellConfig {
    /// Determines if new command entries will be added to the shell's command history.
    ///
    /// Note: This is checked before the other command history config fields.
    enable_command_history: bool,

    /// Number of entries to store in the shell's command history
    command_history_capacity: usize,

    /// Determines if some messages (e.g. "exit", completed background jobs)
    /// should be displayed.
    display_messages: bool,
}

impl ShellConfig {
    /// Creates an interactive shell, e.g. command history, messages
    ///
    /// # Complete List
    /// - Command History is enabled, and a prompt is shown when stdin is a terminal
    /// - "exit" and completed background jobs are announced
    pub fn interactive(command_history_capacity: usize) -> Self {
        Self {
            enable_command_history: true,
            command_history_capacity,
            display_messages: true,
        }
    }

    /// Creates a noninteractive shell, e.g. for `-c` or a script
    ///
    /// # Complete List
    /// - Command History is disabled and no prompt is shown.
    /// - Fewer messages are displayed
    pub fn noninteractive() -> Self {
        Default::default()
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enable_command_history: false,
            command_history_capacity: 0,
            display_messages: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_line() {
        let mut input = io::Cursor::new("jobs\nfg %1\n");
        assert_eq!(read_line(&mut input).unwrap(), Some("jobs\n".to_string()));
        assert_eq!(read_line(&mut input).unwrap(), Some("fg %1\n".to_string()));
        assert_eq!(read_line(&mut input).unwrap(), None);
    }

    #[test]
    fn test_shell_config() {
        let config = ShellConfig::interactive(10);
        assert!(config.enable_command_history);
        assert!(config.display_messages);

        let config = ShellConfig::noninteractive();
        assert!(!config.enable_command_history);
        assert!(!config.display_messages);
    }
}
