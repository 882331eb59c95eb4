//! Error type shared by the build and install pipeline.

use std::path::PathBuf;

/// Exit status when the configuration could not be loaded.
pub const EXIT_CONFIG: u8 = 1;
/// Exit status for command-line usage errors.
pub const EXIT_USAGE: u8 = 2;
/// Exit status when the session ran but at least one device failed.
pub const EXIT_DEVICE_FAILURE: u8 = 3;
/// Exit status when `install` was requested for an unbuilt kernel.
pub const EXIT_NOT_BUILT: u8 = 4;
/// Exit status when a required program could not be launched, as shells do.
pub const EXIT_SPAWN: u8 = 127;
/// Exit status after a user interrupt (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("command `{command}` failed with exit code {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel is not built; run `kernel-builder build` first (looked for {})", .image.display())]
    NotBuilt { image: PathBuf },

    #[error("interrupted by user")]
    Interrupted,

    #[error("another session holds the lock at {}", .0.display())]
    Locked(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit status the driver reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::CommandFailed { exit_code, .. } => match u8::try_from(*exit_code) {
                Ok(0) | Err(_) => 1,
                Ok(code) => code,
            },
            Error::NotBuilt { .. } => EXIT_NOT_BUILT,
            Error::Interrupted => EXIT_INTERRUPTED,
            Error::Spawn { .. } => EXIT_SPAWN,
            Error::Locked(_) | Error::Io { .. } => 1,
        }
    }
}
