//! External process invocation
//!
//! Every tool call goes through a [`ToolRunner`] so the orchestration logic
//! can be exercised without the real binaries installed.

use crate::error::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// One argument of an invocation
#[derive(Clone)]
enum Arg {
    Plain(OsString),
    /// Never rendered in logs or error messages
    Secret(OsString),
}

impl Arg {
    fn value(&self) -> &OsStr {
        match self {
            Arg::Plain(v) | Arg::Secret(v) => v,
        }
    }
}

/// A fully constructed command line plus the environment it needs
#[derive(Clone)]
pub struct Invocation {
    program: OsString,
    args: Vec<Arg>,
    envs: Vec<(OsString, OsString)>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Invocation {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg::Plain(arg.as_ref().to_os_string()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Add an argument that must not show up in logs
    pub fn secret_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg::Secret(arg.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Argument values, secrets included
    pub fn arg_values(&self) -> Vec<&OsStr> {
        self.args.iter().map(Arg::value).collect()
    }

    /// Argument values with secrets replaced by `***`
    pub fn redacted_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg {
                Arg::Plain(v) => v.to_string_lossy().into_owned(),
                Arg::Secret(_) => "***".to_string(),
            })
            .collect()
    }

    pub fn env_value(&self, key: &str) -> Option<&OsStr> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// Short name for messages: program file name plus the first argument
    /// that does not look like an option
    pub fn label(&self) -> String {
        let name = Path::new(&self.program)
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned();

        let mut skip_next = false;
        for arg in &self.args {
            let Arg::Plain(value) = arg else {
                skip_next = false;
                continue;
            };
            let value = value.to_string_lossy();
            if skip_next {
                skip_next = false;
                continue;
            }
            if value == "--config" || value == "--extpass" {
                skip_next = true;
                continue;
            }
            if value.starts_with('-') {
                continue;
            }
            return format!("{} {}", name, value);
        }
        name
    }

    /// Build a std command with this invocation's program, args and env
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args.iter().map(Arg::value));
        command.envs(self.envs.iter().map(|(k, v)| (k, v)));
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in self.redacted_args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invocation({})", self)
    }
}

/// Outcome of a finished tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    /// Captured standard output (empty unless captured)
    pub stdout: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// How a tool's standard output is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Child writes straight to our stdout
    Inherit,
    /// Child stdout is collected into [`ToolOutput::stdout`]
    Capture,
}

/// Runs external tools
pub trait ToolRunner {
    /// Run the invocation to completion; a non-zero exit is not an error here
    fn run(&self, invocation: &Invocation, output: Output) -> Result<ToolOutput>;

    /// Run and fail unless the tool exits successfully
    fn check(&self, invocation: &Invocation) -> Result<()> {
        let result = self.run(invocation, Output::Inherit)?;
        ensure_success(invocation, &result)
    }

    /// Run, fail unless successful, and return trimmed stdout
    fn check_output(&self, invocation: &Invocation) -> Result<String> {
        let result = self.run(invocation, Output::Capture)?;
        ensure_success(invocation, &result)?;
        Ok(result.stdout.trim().to_string())
    }
}

fn ensure_success(invocation: &Invocation, result: &ToolOutput) -> Result<()> {
    if result.success() {
        return Ok(());
    }
    Err(Error::ToolFailed {
        tool: invocation.label(),
        status: result.status,
    })
}

/// Runs tools as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation, output: Output) -> Result<ToolOutput> {
        debug!("Running {}", invocation);

        let mut command = invocation.to_command();
        command.stdin(Stdio::null());

        let launch_error = |source| Error::ToolLaunch {
            tool: invocation.label(),
            source,
        };

        match output {
            Output::Inherit => {
                let status = command.status().map_err(launch_error)?;
                Ok(ToolOutput {
                    status: status.code(),
                    stdout: String::new(),
                })
            }
            Output::Capture => {
                command.stderr(Stdio::inherit());
                let out = command.output().map_err(launch_error)?;
                Ok(ToolOutput {
                    status: out.status.code(),
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                })
            }
        }
    }
}
