use std::fmt;
use std::io;
use std::os::unix::prelude::*;
use std::os::unix::process::ExitStatusExt;
use std::process::{self, ExitStatus};

use log::error;

/// Log `$result` if it is an error, then carry on.
macro_rules! log_if_err {
    ($result:expr, $($arg:tt)+) => {
        if let Err(ref e) = $result {
            log::error!("{}: {}", format_args!($($arg)+), e);
        }
    };
}

/// Exit status the shell uses when an unrecoverable primitive fails.
pub const FATAL_EXIT_STATUS: i32 = 1;

/// Jcsh Utility Extensions for `ExitStatus`
pub trait JcshExitStatusExt {
    /// Create an ExitStatus to indicate *successful* program execution.
    fn from_success() -> Self;

    /// Create an ExitStatus to indicate *unsuccessful* program execution.
    fn from_failure() -> Self;

    /// Create an ExitStatus from a status code
    fn from_status(code: i32) -> Self;
}

impl JcshExitStatusExt for ExitStatus {
    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(ExitStatus::from_success().success());
    /// ```
    fn from_success() -> Self {
        ExitStatus::from_status(0)
    }

    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(!ExitStatus::from_failure().success());
    /// ```
    fn from_failure() -> Self {
        ExitStatus::from_status(1)
    }

    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(ExitStatus::from_status(0).success());
    /// assert_eq!(ExitStatus::from_status(130).code(), Some(130));
    /// ```
    fn from_status(code: i32) -> Self {
        ExitStatus::from_raw((code & 0xff) << 8)
    }
}

/// The shell's controlling terminal is whatever its stdin refers to.
pub fn get_terminal() -> RawFd {
    io::stdin().as_raw_fd()
}

/// Terminates the shell after an OS primitive it depends on has failed.
pub fn fatal<E: fmt::Display>(what: &str, err: E) -> ! {
    error!("fatal: {}: {}", what, err);
    eprintln!("jcsh: {}: {}", what, err);
    process::exit(FATAL_EXIT_STATUS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_from_status() {
        assert_eq!(ExitStatus::from_status(85).code(), Some(85));
        assert_eq!(ExitStatus::from_status(300).code(), Some(44));
        assert!(!ExitStatus::from_failure().success());
    }
}
