// src/exec/command.rs

//! Command descriptions handed to the supervisor.

use std::ffi::OsString;
use std::io::{self, PipeWriter};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// A fully resolved command: program, argv and optional working directory.
///
/// Arguments are passed as discrete argv elements; nothing here goes through
/// a shell unless the caller explicitly builds one with [`CommandSpec::shell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Run `script` through the platform shell (`sh -c` / `cmd /C`).
    pub fn shell(script: impl Into<OsString>) -> Self {
        if cfg!(windows) {
            CommandSpec::new("cmd").arg("/C").arg(script)
        } else {
            CommandSpec::new("sh").arg("-c").arg(script)
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program name for logs and error messages.
    pub fn program_display(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Build the tokio command with stdout and stderr both writing to
    /// `output`.
    ///
    /// On Unix the child becomes the leader of a new process group so that
    /// stop signals reach anything it forks.
    pub(crate) fn to_command(&self, output: PipeWriter) -> io::Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(output.try_clone()?)
            .stderr(output)
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        Ok(cmd)
    }
}

/// A reusable command with a fixed prefix of arguments.
///
/// Callers supply the remaining argument list per run, mirroring how a
/// request handler fills in caller-provided parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Append `extra` to the template's own arguments.
    pub fn instantiate<I, S>(&self, extra: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let spec = CommandSpec::new(&self.program)
            .args(self.args.iter())
            .args(extra);
        match &self.working_dir {
            Some(dir) => spec.current_dir(dir),
            None => spec,
        }
    }
}
