//! Logging capability handed to every component.
//!
//! Components never log through globals; they receive an `Rc<dyn Log>` at
//! construction. [`TracingLog`] is the production sink and forwards to
//! `tracing`, so subscriber setup stays in the binary.

use crate::process::{Cmd, CmdOutput};

pub trait Log {
    fn info(&self, msg: &str);

    fn warning(&self, msg: &str);

    fn error(&self, msg: &str);

    /// Record a command that is about to run.
    fn command(&self, cmd: &Cmd) {
        self.info(&format!("==> {}", cmd));
    }

    /// Record the captured output and exit code of a finished command.
    fn output(&self, cmd: &Cmd, output: &CmdOutput) {
        for line in output.text.lines() {
            self.info(&format!("    {}", line));
        }
        let msg = format!("<== {} (exit code {})", cmd.program(), output.exit_code);
        if output.success() {
            self.info(&msg);
        } else {
            self.warning(&msg);
        }
    }
}

/// [`Log`] implementation backed by `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl Log for TracingLog {
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    fn command(&self, cmd: &Cmd) {
        match cmd.working_dir() {
            Some(dir) => tracing::info!(command = %cmd, cwd = %dir.display(), "running"),
            None => tracing::info!(command = %cmd, "running"),
        }
    }

    fn output(&self, cmd: &Cmd, output: &CmdOutput) {
        for line in output.text.lines() {
            tracing::info!(program = cmd.program(), "{line}");
        }
        if output.success() {
            tracing::info!(command = %cmd, exit_code = output.exit_code, "finished");
        } else {
            tracing::warn!(command = %cmd, exit_code = output.exit_code, "finished");
        }
    }
}
