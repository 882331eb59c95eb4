//! Installation session: one kernel, every configured boot device.
//!
//! Devices are processed strictly in order, one at a time, because they all
//! share the same mountpoint. A failing device is recorded and the next one
//! is attempted; only a user interrupt stops the batch early.
//!
//! A session holds an exclusive lock on `<backup_config_dir>/.kernel-builder.lock`
//! for its whole duration so two sessions never fight over the mountpoint.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::boot::{BootDevice, DeviceTarget, InstallationOutcome};
use crate::config::{BootloaderTools, BuildConfig};
use crate::error::{Error, Result, EXIT_DEVICE_FAILURE};
use crate::kernel::ArtifactInstaller;
use crate::log::Log;
use crate::process::Runner;

pub const LOCK_FILE_NAME: &str = ".kernel-builder.lock";

pub struct InstallationSession {
    lock_path: PathBuf,
    tools: BootloaderTools,
    runner: Rc<dyn Runner>,
    log: Rc<dyn Log>,
}

/// Per-device outcomes, in target order.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub outcomes: Vec<InstallationOutcome>,
}

impl SessionReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(InstallationOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &InstallationOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// `0` when every device succeeded, otherwise the device failure status.
    pub fn exit_code(&self) -> u8 {
        if self.all_succeeded() {
            0
        } else {
            EXIT_DEVICE_FAILURE
        }
    }
}

/// Held for the lifetime of a session. The lock is released when the file is
/// closed.
struct SessionLock {
    _file: File,
    path: PathBuf,
}

impl InstallationSession {
    pub fn new(config: &BuildConfig, runner: Rc<dyn Runner>, log: Rc<dyn Log>) -> Self {
        Self {
            lock_path: config.backup_config_dir.join(LOCK_FILE_NAME),
            tools: config.bootloader.clone(),
            runner,
            log,
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Install the built kernel to every target.
    ///
    /// Fails before touching any device if the kernel is not built or another
    /// session holds the lock. Per-device failures are reported, not returned.
    pub fn install_all(
        &self,
        installer: &mut ArtifactInstaller,
        targets: &[DeviceTarget],
    ) -> Result<SessionReport> {
        installer.ensure_built()?;
        let lock = self.acquire_lock()?;
        self.log.info(&format!(
            "session lock held at {} ({} device(s))",
            lock.path.display(),
            targets.len()
        ));

        let mut report = SessionReport::default();
        for target in targets {
            let mut device = BootDevice::new(
                target.clone(),
                self.tools.clone(),
                self.runner.clone(),
                self.log.clone(),
            );
            let outcome = device.install_kernel(installer);
            let interrupted = outcome.interrupted;
            report.outcomes.push(outcome);
            if interrupted {
                self.log.warning("interrupted, skipping remaining devices");
                return Err(Error::Interrupted);
            }
        }

        self.log_summary(&report);
        Ok(report)
    }

    fn acquire_lock(&self) -> Result<SessionLock> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }

        // The lock file is never removed; unlinking it while locked would let
        // a second session lock a fresh file at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| Error::io(format!("opening {}", self.lock_path.display()), e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(Error::Locked(self.lock_path.clone()));
        }

        Ok(SessionLock {
            _file: file,
            path: self.lock_path.clone(),
        })
    }

    fn log_summary(&self, report: &SessionReport) {
        let failed = report.failures().count();
        if failed == 0 {
            self.log.info(&format!(
                "kernel installed on all {} device(s)",
                report.outcomes.len()
            ));
            return;
        }
        self.log.error(&format!(
            "{} of {} device(s) failed",
            failed,
            report.outcomes.len()
        ));
        for outcome in report.failures() {
            if let Some(stage) = outcome.failed_stage {
                self.log.error(&format!(
                    "    {}: {} ({})",
                    outcome.device,
                    stage,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }
}
