//! Process boundary for external image tools.
//!
//! The [`CommandRunner`] trait is the only place where this crate spawns
//! processes. Command construction elsewhere is pure; the runner executes a
//! [`ShellCommand`] and hands back its standard output.
//!
//! The production implementation is [`ProcessRunner`]. Tests substitute the
//! recording mock in [`tests::MockRunner`].

use super::params::ShellCommand;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` produced no output")]
    EmptyOutput { command: String },
}

/// Executes external commands.
///
/// Implementations must be shareable across worker threads; each call is a
/// blocking, independent invocation.
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion and return its standard output.
    ///
    /// A non-zero exit status is an error carrying the tool's stderr.
    fn execute(&self, command: &ShellCommand) -> Result<Vec<u8>, BackendError>;
}

/// Runs commands as child processes via [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    fn execute(&self, command: &ShellCommand) -> Result<Vec<u8>, BackendError> {
        debug!(%command, "executing");
        let output = Command::new(&command.program)
            .args(&command.args)
            .output()
            .map_err(|e| {
                BackendError::ProcessingFailed(format!("Failed to spawn {}: {e}", command.program))
            })?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock runner that records commands without executing them.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    ///
    /// `identify` invocations answer with the scripted `HxW` dimensions; every
    /// other command answers with `output`.
    pub struct MockRunner {
        pub dimensions: Mutex<Option<String>>,
        pub output: Mutex<Vec<u8>>,
        pub fail: Mutex<bool>,
        pub commands: Mutex<Vec<String>>,
    }

    impl Default for MockRunner {
        fn default() -> Self {
            Self {
                dimensions: Mutex::new(None),
                output: Mutex::new(b"imagedata".to_vec()),
                fail: Mutex::new(false),
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer `identify` with `height x width`, the way the real tool prints it.
        pub fn with_dimensions(height_x_width: &str) -> Self {
            let runner = Self::default();
            *runner.dimensions.lock().unwrap() = Some(height_x_width.to_string());
            runner
        }

        pub fn failing() -> Self {
            let runner = Self::default();
            *runner.fail.lock().unwrap() = true;
            runner
        }

        pub fn get_commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl CommandRunner for MockRunner {
        fn execute(&self, command: &ShellCommand) -> Result<Vec<u8>, BackendError> {
            self.commands.lock().unwrap().push(command.to_string());

            if command.program.ends_with("identify") {
                return self
                    .dimensions
                    .lock()
                    .unwrap()
                    .clone()
                    .map(String::into_bytes)
                    .ok_or_else(|| BackendError::ProcessingFailed("No mock dimensions".into()));
            }
            if *self.fail.lock().unwrap() {
                return Err(BackendError::CommandFailed {
                    command: command.to_string(),
                    status: "exit status: 1".into(),
                    stderr: "mock failure".into(),
                });
            }
            Ok(self.output.lock().unwrap().clone())
        }
    }

    #[test]
    fn mock_records_commands() {
        let runner = MockRunner::new();
        let out = runner
            .execute(&ShellCommand::new("convert").args(["/a.jpg", "png:-"]))
            .unwrap();
        assert_eq!(out, b"imagedata");
        assert_eq!(runner.get_commands(), vec!["convert /a.jpg png:-"]);
    }

    #[test]
    fn mock_answers_identify() {
        let runner = MockRunner::with_dimensions("131x175");
        let out = runner
            .execute(&ShellCommand::new("identify").args(["-format", "%hx%w", "/a.jpg"]))
            .unwrap();
        assert_eq!(out, b"131x175");
    }

    #[test]
    fn mock_failure_is_command_failed() {
        let runner = MockRunner::failing();
        let err = runner.execute(&ShellCommand::new("convert")).unwrap_err();
        assert!(matches!(err, BackendError::CommandFailed { .. }));
    }

    #[test]
    fn process_runner_reports_missing_program() {
        let err = ProcessRunner::new()
            .execute(&ShellCommand::new("definitely-not-an-installed-tool-xyz"))
            .unwrap_err();
        assert!(matches!(err, BackendError::ProcessingFailed(_)));
    }
}
