//! Command descriptions for external tools.
//!
//! A [`ShellCommand`] describes *what* to run, not *how*. Command factories
//! build them without side effects; a [`CommandRunner`](super::CommandRunner)
//! executes them. This separation lets tests assert on exact command lines
//! without spawning anything.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

/// A program plus its argument vector.
///
/// Arguments are kept as discrete values and are never re-split by a shell.
/// [`Display`](fmt::Display) renders a readable command line for logs and
/// for the `plan` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<OsString>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains('{') || arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
