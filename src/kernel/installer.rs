//! Kernel configure, build and install steps.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kernel_builder::kernel::ArtifactInstaller;
//!
//! let mut installer = ArtifactInstaller::new(&config, runner, log);
//! installer.build()?;
//! let artifacts = installer.install(&config.boot_mountpoint)?;
//! ```

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::backup::ConfigBackup;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::kernel::artifact::{ArtifactKind, KernelArtifactSet, StagedArtifact};
use crate::kernel::state::KernelState;
use crate::log::Log;
use crate::process::{Cmd, Runner};

pub struct ArtifactInstaller {
    linux_dir: PathBuf,
    build_jobs: u32,
    initramfs_tool: String,
    initramfs_args: Vec<String>,
    backup: ConfigBackup,
    state: KernelState,
    modules_installed: bool,
    runner: Rc<dyn Runner>,
    log: Rc<dyn Log>,
}

impl ArtifactInstaller {
    pub fn new(config: &BuildConfig, runner: Rc<dyn Runner>, log: Rc<dyn Log>) -> Self {
        Self {
            linux_dir: config.linux_dir.clone(),
            build_jobs: config.build_jobs,
            initramfs_tool: config.initramfs_tool.clone(),
            initramfs_args: config.initramfs_args.clone(),
            backup: ConfigBackup::new(
                config.dot_config(),
                config.backup_config_dir.clone(),
                log.clone(),
            ),
            state: KernelState::new(config, log.clone()),
            modules_installed: false,
            runner,
            log,
        }
    }

    /// Replace the build state, e.g. one with a pinned timestamp.
    pub fn with_state(mut self, state: KernelState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &KernelState {
        &self.state
    }

    fn jobs_arg(&self) -> String {
        format!("-j{}", self.build_jobs)
    }

    /// Back up `.config`, run the interactive `make nconfig`, then refresh
    /// `.config.latest` with the result.
    pub fn configure(&mut self) -> Result<()> {
        self.backup.backup();
        Cmd::new("make")
            .args([self.jobs_arg(), "nconfig".to_string()])
            .current_dir(&self.linux_dir)
            .run_interactive_with(self.runner.as_ref())?;
        self.backup.refresh_latest();
        Ok(())
    }

    /// Compile the kernel image and modules.
    ///
    /// A failing compile aborts the run; nothing may be installed from a
    /// broken build.
    pub fn build(&mut self) -> Result<()> {
        self.log.info("---> building kernel <---");
        self.backup.backup();
        self.backup.refresh_latest();

        Cmd::new("make")
            .args([self.jobs_arg(), "bzImage".to_string(), "modules".to_string()])
            .current_dir(&self.linux_dir)
            .run_with(self.runner.as_ref())?;

        self.state.mark_built();
        self.log.info("kernel build finished");
        Ok(())
    }

    /// Fail with [`Error::NotBuilt`] unless a built kernel is available.
    pub fn ensure_built(&self) -> Result<()> {
        if self.state.is_built() {
            Ok(())
        } else {
            Err(Error::NotBuilt {
                image: self.state.image_path().to_path_buf(),
            })
        }
    }

    /// Install modules, kernel and initramfs into `boot_dir`, then make the
    /// versioned copies.
    ///
    /// Module installation targets the host and runs once per installer; the
    /// remaining steps run on every call since each device is mounted at the
    /// same `boot_dir` in turn.
    pub fn install(&mut self, boot_dir: &Path) -> Result<KernelArtifactSet> {
        self.ensure_built()?;

        if !self.modules_installed {
            self.log.info("---> installing kernel modules <---");
            Cmd::new("make")
                .arg("modules_install")
                .current_dir(&self.linux_dir)
                .run_with(self.runner.as_ref())?;
            self.modules_installed = true;
        }

        self.log.info("---> installing kernel <---");
        Cmd::new("make")
            .arg("install")
            .arg(format!("INSTALL_PATH={}", boot_dir.display()))
            .current_dir(&self.linux_dir)
            .run_with(self.runner.as_ref())?;

        self.log.info("---> building initramfs <---");
        Cmd::new(self.initramfs_tool.as_str())
            .args(self.initramfs_args.iter().cloned())
            .arg("initramfs")
            .run_with(self.runner.as_ref())?;

        self.log.info("---> renaming kernel files <---");
        Ok(self.stage_versioned(boot_dir))
    }

    /// Copy each known artifact in `boot_dir` to its versioned name.
    ///
    /// Missing sources and failed copies are logged and skipped.
    pub fn stage_versioned(&self, boot_dir: &Path) -> KernelArtifactSet {
        let version = self.state.version().to_string();
        let timestamp = self.state.build_timestamp().to_string();
        let mut files = Vec::new();

        for kind in ArtifactKind::ALL {
            let source = boot_dir.join(kind.source_name(&version));
            if !source.is_file() {
                self.log
                    .info(&format!("{} not found, skipping", source.display()));
                continue;
            }
            let target = boot_dir.join(kind.versioned_name(&version, &timestamp));
            self.log
                .info(&format!("{} -> {}", source.display(), target.display()));
            match copy_verified(&source, &target) {
                Ok(sha256) => files.push(StagedArtifact {
                    kind,
                    source,
                    target,
                    sha256,
                }),
                Err(e) => self.log.error(&format!(
                    "copying {} failed: {}",
                    source.display(),
                    e
                )),
            }
        }

        KernelArtifactSet {
            version,
            timestamp,
            files,
        }
    }
}

/// Copy `src` to `dst` and check the copy's SHA-256 against the source.
/// A mismatching copy is removed.
fn copy_verified(src: &Path, dst: &Path) -> Result<String> {
    fs::copy(src, dst).map_err(|e| Error::io(format!("copying to {}", dst.display()), e))?;

    let expected =
        sha256_file(src).map_err(|e| Error::io(format!("hashing {}", src.display()), e))?;
    let actual =
        sha256_file(dst).map_err(|e| Error::io(format!("hashing {}", dst.display()), e))?;
    if expected != actual {
        let _ = fs::remove_file(dst);
        return Err(Error::io(
            format!("verifying {}", dst.display()),
            io::Error::new(io::ErrorKind::InvalidData, "checksum mismatch after copy"),
        ));
    }
    Ok(actual)
}

pub(crate) fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
