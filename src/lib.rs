//! jcsh - Job Control Shell
//!
//! The library turns parsed pipelines into process groups, tracks them as
//! jobs and arbitrates the controlling terminal between the shell and its
//! children.

#![deny(missing_debug_implementations, unused_import_braces)]

#[macro_use]
extern crate serde_derive;

#[macro_use]
mod util;

mod builtins;
pub mod core;
mod editor;
pub mod errors;
mod execute_command;
pub mod shell;

pub use crate::shell::{Shell, ShellConfig};
pub use crate::util::JcshExitStatusExt;
