//! External command execution.
//!
//! Commands are built as argument vectors with [`Cmd`] and executed through a
//! [`Runner`]. Two modes exist:
//!
//! - [`Runner::run`] buffers stdout and stderr and returns them combined.
//! - [`Runner::run_interactive`] inherits the terminal and captures nothing,
//!   for tools like `make nconfig` that need one.
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_builder::process::{Cmd, Runner};
//!
//! Cmd::new("make")
//!     .args(["-j8", "bzImage", "modules"])
//!     .current_dir(&linux_dir)
//!     .run_with(runner)?;
//! ```

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::Signal;

use crate::error::{Error, Result};
use crate::interrupt;
use crate::log::Log;

/// An external command as an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    check: bool,
    always_run: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            check: true,
            always_run: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Don't turn a non-zero exit into [`Error::CommandFailed`].
    pub fn allow_fail(mut self) -> Self {
        self.check = false;
        self
    }

    /// Run even after Ctrl-C. Reserved for cleanup such as unmounting.
    pub fn always_run(mut self) -> Self {
        self.always_run = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn checks_success(&self) -> bool {
        self.check
    }

    pub fn runs_when_interrupted(&self) -> bool {
        self.always_run
    }

    /// Run in buffered mode.
    pub fn run_with(&self, runner: &dyn Runner) -> Result<CmdOutput> {
        runner.run(self)
    }

    /// Run with the terminal attached.
    pub fn run_interactive_with(&self, runner: &dyn Runner) -> Result<CmdOutput> {
        runner.run_interactive(self)
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Exit code and combined output of a finished command.
///
/// `text` is empty for interactive runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub exit_code: i32,
    pub text: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes [`Cmd`]s.
///
/// Implementations must log every invocation before returning, honour
/// [`Cmd::checks_success`], and refuse to start anything but
/// [`Cmd::always_run`] commands once the user has interrupted the run.
pub trait Runner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput>;

    fn run_interactive(&self, cmd: &Cmd) -> Result<CmdOutput>;
}

/// [`Runner`] that spawns real processes.
pub struct SystemRunner {
    log: Rc<dyn Log>,
    interrupt: &'static AtomicBool,
}

impl SystemRunner {
    pub fn new(log: Rc<dyn Log>) -> Self {
        Self {
            log,
            interrupt: interrupt::flag(),
        }
    }

    /// Watch `flag` instead of the process-wide Ctrl-C flag.
    #[cfg(test)]
    pub(crate) fn with_interrupt_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.interrupt = flag;
        self
    }

    /// Whether `cmd` must be stopped because of an earlier Ctrl-C.
    fn stopped(&self, cmd: &Cmd) -> bool {
        self.interrupt.load(Ordering::SeqCst) && !cmd.runs_when_interrupted()
    }

    fn refuse_if_interrupted(&self, cmd: &Cmd) -> Result<()> {
        if self.stopped(cmd) {
            self.log
                .warning(&format!("interrupted, not starting `{}`", cmd));
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    fn spawn_error(&self, cmd: &Cmd, source: std::io::Error) -> Error {
        self.log
            .error(&format!("failed to launch `{}`: {}", cmd, source));
        Error::Spawn {
            command: cmd.to_string(),
            source,
        }
    }
}

impl Runner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
        self.refuse_if_interrupted(cmd)?;
        self.log.command(cmd);
        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(cmd, e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let result = CmdOutput {
            exit_code: exit_code(&output.status),
            text,
        };
        self.log.output(cmd, &result);
        let interrupted = killed_by_sigint(&output.status) || self.stopped(cmd);
        finish(cmd, result, interrupted)
    }

    fn run_interactive(&self, cmd: &Cmd) -> Result<CmdOutput> {
        self.refuse_if_interrupted(cmd)?;
        self.log.command(cmd);
        let status = cmd
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| self.spawn_error(cmd, e))?;

        let result = CmdOutput {
            exit_code: exit_code(&status),
            text: String::new(),
        };
        self.log.output(cmd, &result);
        let interrupted = killed_by_sigint(&status) || self.stopped(cmd);
        finish(cmd, result, interrupted)
    }
}

/// Shell-style exit code: signal deaths map to 128 + signal number.
fn exit_code(status: &ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn killed_by_sigint(status: &ExitStatus) -> bool {
    status.signal() == Some(Signal::SIGINT as i32)
}

/// Apply the interrupt and success checks shared by every runner.
pub(crate) fn finish(cmd: &Cmd, result: CmdOutput, interrupted: bool) -> Result<CmdOutput> {
    if interrupted {
        return Err(Error::Interrupted);
    }
    if cmd.checks_success() && !result.success() {
        return Err(Error::CommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.text,
        });
    }
    Ok(result)
}
