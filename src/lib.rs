//! Build a Linux kernel and install it to removable boot devices.
//!
//! The crate drives external tools (`make`, the initramfs generator, `mount`,
//! `grub-install`, `grub-mkconfig`) and keeps track of what it has done:
//!
//! - **Kernel state** - whether a kernel is built, its release and the run
//!   timestamp shared by every versioned artifact
//! - **Artifact installer** - configure/build/install steps and the versioned
//!   copies in the boot directory
//! - **Boot devices** - mount lifecycle, BIOS + UEFI GRUB install and config
//!   regeneration, with a guaranteed unmount
//! - **Installation session** - every configured device in turn, failures
//!   isolated per device
//!
//! # Architecture
//!
//! ```text
//! kernel-builder (binary)
//!     │
//!     ├── config::BuildConfig ──────── loaded once, shared read-only
//!     │
//!     ├── kernel::ArtifactInstaller
//!     │       ├── kernel::KernelState
//!     │       └── backup::ConfigBackup
//!     │
//!     └── session::InstallationSession
//!             └── boot::BootDevice (one per target, sequential)
//!
//! every component ── process::Runner (commands) + log::Log (messages)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use kernel_builder::{config::BuildConfig, kernel::ArtifactInstaller};
//! use kernel_builder::log::{Log, TracingLog};
//! use kernel_builder::process::{Runner, SystemRunner};
//!
//! let config = BuildConfig::load("kernel_builder.json".as_ref())?;
//! let log: Rc<dyn Log> = Rc::new(TracingLog);
//! let runner: Rc<dyn Runner> = Rc::new(SystemRunner::new(log.clone()));
//!
//! let mut installer = ArtifactInstaller::new(&config, runner, log);
//! installer.build()?;
//! ```

pub mod backup;
pub mod boot;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod kernel;
pub mod log;
pub mod preflight;
pub mod process;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::BuildConfig;
pub use error::{Error, Result};
pub use kernel::{ArtifactInstaller, KernelArtifactSet, KernelState};
pub use session::{InstallationSession, SessionReport};
