//! Boot device controller.
//!
//! Owns the mount lifecycle of one removable boot target and drives the
//! per-device sequence:
//!
//! ```text
//! mount → verify → install/copy artifacts → grub (BIOS + UEFI)
//!       → grub-mkconfig → unmount
//! ```
//!
//! The unmount is performed by a drop guard, so it runs exactly once after any
//! mount attempt, on every exit path.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use walkdir::WalkDir;

use crate::boot::probe::{self, CONFIG_DIR_CANDIDATES, DEFAULT_CONFIG_DIR};
use crate::config::{BootloaderTools, BuildConfig};
use crate::error::{Error, Result};
use crate::kernel::{ArtifactInstaller, KernelArtifactSet};
use crate::log::Log;
use crate::process::{Cmd, Runner};

/// One removable boot device as named in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    /// Whole-disk block device, e.g. `/dev/sdb`. BIOS GRUB goes here.
    pub device: String,
    /// Partition suffix, e.g. `1` for `/dev/sdb1`.
    pub partition: String,
    pub mountpoint: PathBuf,
}

impl DeviceTarget {
    /// A missing device node is only a warning: the device may be plugged in
    /// by the time it is mounted.
    pub fn new(
        device: impl Into<String>,
        partition: impl Into<String>,
        mountpoint: impl Into<PathBuf>,
        log: &dyn Log,
    ) -> Self {
        let target = Self {
            device: device.into(),
            partition: partition.into(),
            mountpoint: mountpoint.into(),
        };
        let node = target.partition_node();
        if !Path::new(&node).exists() {
            log.warning(&format!("device {} not found", node));
        }
        target
    }

    /// All configured devices, in configuration order, sharing the boot
    /// mountpoint.
    pub fn from_config(config: &BuildConfig, log: &dyn Log) -> Vec<Self> {
        config
            .flash_devices
            .iter()
            .map(|dev| Self::new(&dev.device, &dev.partition, &config.boot_mountpoint, log))
            .collect()
    }

    pub fn partition_node(&self) -> String {
        format!("{}{}", self.device, self.partition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    Bios,
    Uefi,
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareMode::Bios => f.write_str("BIOS"),
            FirmwareMode::Uefi => f.write_str("UEFI"),
        }
    }
}

/// Step of the per-device sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Mount,
    Copy,
    BootloaderBios,
    BootloaderUefi,
    ConfigRegeneration,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStage::Mount => "mount",
            InstallStage::Copy => "copy",
            InstallStage::BootloaderBios => "bootloader (BIOS)",
            InstallStage::BootloaderUefi => "bootloader (UEFI)",
            InstallStage::ConfigRegeneration => "config regeneration",
        };
        f.write_str(name)
    }
}

/// Results of the two independent bootloader installs.
#[derive(Debug)]
pub struct BootloaderReport {
    pub bios: Result<()>,
    pub uefi: Result<()>,
}

impl BootloaderReport {
    /// At least one firmware mode is covered.
    pub fn succeeded(&self) -> bool {
        self.bios.is_ok() || self.uefi.is_ok()
    }

    pub fn installed_modes(&self) -> Vec<FirmwareMode> {
        let mut modes = Vec::new();
        if self.bios.is_ok() {
            modes.push(FirmwareMode::Bios);
        }
        if self.uefi.is_ok() {
            modes.push(FirmwareMode::Uefi);
        }
        modes
    }
}

/// Result of installing to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationOutcome {
    /// Partition node, e.g. `/dev/sdb1`.
    pub device: String,
    pub failed_stage: Option<InstallStage>,
    pub error: Option<String>,
    pub bootloader_modes: Vec<FirmwareMode>,
    pub artifacts: Option<KernelArtifactSet>,
    pub interrupted: bool,
}

impl InstallationOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed_stage.is_none()
    }
}

struct StageFailure {
    stage: InstallStage,
    error: Error,
}

fn at(stage: InstallStage) -> impl FnOnce(Error) -> StageFailure {
    move |error| StageFailure { stage, error }
}

pub struct BootDevice {
    target: DeviceTarget,
    tools: BootloaderTools,
    state: MountState,
    runner: Rc<dyn Runner>,
    log: Rc<dyn Log>,
}

impl BootDevice {
    pub fn new(
        target: DeviceTarget,
        tools: BootloaderTools,
        runner: Rc<dyn Runner>,
        log: Rc<dyn Log>,
    ) -> Self {
        Self {
            target,
            tools,
            state: MountState::Unmounted,
            runner,
            log,
        }
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    /// Mount the boot partition and verify the mountpoint is live.
    pub fn mount(&mut self) -> Result<()> {
        let node = self.target.partition_node();
        self.log.info(&format!(
            "mounting {} at {}",
            node,
            self.target.mountpoint.display()
        ));
        self.state = MountState::Mounting;

        Cmd::new("mount")
            .arg(node)
            .arg_path(&self.target.mountpoint)
            .run_with(self.runner.as_ref())?;
        Cmd::new("mountpoint")
            .arg("-q")
            .arg_path(&self.target.mountpoint)
            .run_with(self.runner.as_ref())?;

        self.state = MountState::Mounted;
        Ok(())
    }

    pub fn unmount(&mut self) -> Result<()> {
        self.log.info(&format!(
            "unmounting {}",
            self.target.mountpoint.display()
        ));
        self.state = MountState::Unmounting;
        let result = Cmd::new("umount")
            .arg_path(&self.target.mountpoint)
            .always_run()
            .run_with(self.runner.as_ref());
        self.state = MountState::Unmounted;
        result.map(|_| ())
    }

    /// Install GRUB for legacy BIOS and for UEFI. The two attempts are
    /// independent; neither failure prevents the other, except an interrupt,
    /// which skips UEFI.
    pub fn install_bootloader(&self) -> BootloaderReport {
        let mountpoint = &self.target.mountpoint;
        let boot_dir_arg = format!("--boot-directory={}", mountpoint.display());

        let bios = Cmd::new(self.tools.install_tool.as_str())
            .arg("--target=i386-pc")
            .arg(boot_dir_arg.as_str())
            .arg(self.target.device.as_str())
            .run_with(self.runner.as_ref())
            .map(|_| ());
        if let Err(e) = &bios {
            self.log
                .warning(&format!("BIOS bootloader install failed: {}", e));
        }

        if matches!(bios, Err(Error::Interrupted)) {
            return BootloaderReport {
                bios,
                uefi: Err(Error::Interrupted),
            };
        }

        let uefi = Cmd::new(self.tools.install_tool.as_str())
            .arg("--target=x86_64-efi")
            .arg(format!("--efi-directory={}", mountpoint.display()))
            .arg(boot_dir_arg.as_str())
            .args(["--removable", "--no-nvram"])
            .run_with(self.runner.as_ref())
            .map(|_| ());
        if let Err(e) = &uefi {
            self.log
                .warning(&format!("UEFI bootloader install failed: {}", e));
        }

        BootloaderReport { bios, uefi }
    }

    /// Directory holding `grub.cfg` on the mounted volume.
    pub fn locate_bootloader_config_path(&self) -> Result<PathBuf> {
        probe::locate_or_create(
            &self.target.mountpoint,
            CONFIG_DIR_CANDIDATES,
            DEFAULT_CONFIG_DIR,
        )
        .map_err(|e| {
            Error::io(
                format!(
                    "creating {}",
                    self.target.mountpoint.join(DEFAULT_CONFIG_DIR).display()
                ),
                e,
            )
        })
    }

    /// Regenerate `grub.cfg` on the device. Returns the written path.
    pub fn regenerate_config(&self) -> Result<PathBuf> {
        let config = self.locate_bootloader_config_path()?.join("grub.cfg");
        self.log.info(&format!(
            "---> generating {} on the device",
            config.display()
        ));
        Cmd::new(self.tools.mkconfig_tool.as_str())
            .arg("-o")
            .arg_path(&config)
            .run_with(self.runner.as_ref())?;
        Ok(config)
    }

    /// Run the whole per-device sequence. Never fails: every error becomes a
    /// failed [`InstallationOutcome`] and the device is unmounted regardless.
    pub fn install_kernel(&mut self, installer: &mut ArtifactInstaller) -> InstallationOutcome {
        let device = self.target.partition_node();
        self.log
            .info(&format!("---> installing kernel to {} <---", device));

        let result = MountGuard::new(self).run_sequence(installer);

        match result {
            Ok((modes, artifacts)) => {
                let modes_text = modes
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" + ");
                self.log.info(&format!(
                    "{}: kernel {} installed ({})",
                    device, artifacts.version, modes_text
                ));
                InstallationOutcome {
                    device,
                    failed_stage: None,
                    error: None,
                    bootloader_modes: modes,
                    artifacts: Some(artifacts),
                    interrupted: false,
                }
            }
            Err(StageFailure { stage, error }) => {
                self.log
                    .error(&format!("{}: {} failed: {}", device, stage, error));
                InstallationOutcome {
                    device,
                    failed_stage: Some(stage),
                    interrupted: matches!(error, Error::Interrupted),
                    error: Some(error.to_string()),
                    bootloader_modes: Vec::new(),
                    artifacts: None,
                }
            }
        }
    }

    fn run_sequence(
        &mut self,
        installer: &mut ArtifactInstaller,
    ) -> std::result::Result<(Vec<FirmwareMode>, KernelArtifactSet), StageFailure> {
        self.mount().map_err(at(InstallStage::Mount))?;

        self.log_listing("before installation");
        let artifacts = installer
            .install(&self.target.mountpoint)
            .map_err(at(InstallStage::Copy))?;
        self.log_listing("after installation");

        let report = self.install_bootloader();
        let modes = report.installed_modes();
        match report {
            BootloaderReport {
                bios: Err(Error::Interrupted),
                ..
            } => return Err(at(InstallStage::BootloaderBios)(Error::Interrupted)),
            BootloaderReport {
                uefi: Err(Error::Interrupted),
                ..
            } => return Err(at(InstallStage::BootloaderUefi)(Error::Interrupted)),
            BootloaderReport {
                bios: Err(error),
                uefi: Err(_),
            } => return Err(at(InstallStage::BootloaderBios)(error)),
            _ => {}
        }

        self.regenerate_config()
            .map_err(at(InstallStage::ConfigRegeneration))?;
        Ok((modes, artifacts))
    }

    fn log_listing(&self, label: &str) {
        let mountpoint = &self.target.mountpoint;
        self.log.info(&format!(
            "---> files in {} {}:",
            mountpoint.display(),
            label
        ));
        for entry in WalkDir::new(mountpoint)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            match entry {
                Ok(entry) => {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    let slash = if entry.file_type().is_dir() { "/" } else { "" };
                    self.log.info(&format!(
                        "    {:>12}  {}{}",
                        size,
                        entry.file_name().to_string_lossy(),
                        slash
                    ));
                }
                Err(e) => self.log.warning(&format!("    listing failed: {}", e)),
            }
        }
    }
}

/// Unmounts on drop. Created before the mount attempt so a failed mount is
/// still followed by exactly one unmount.
struct MountGuard<'a> {
    device: &'a mut BootDevice,
}

impl<'a> MountGuard<'a> {
    fn new(device: &'a mut BootDevice) -> Self {
        Self { device }
    }
}

impl Deref for MountGuard<'_> {
    type Target = BootDevice;

    fn deref(&self) -> &BootDevice {
        self.device
    }
}

impl DerefMut for MountGuard<'_> {
    fn deref_mut(&mut self) -> &mut BootDevice {
        self.device
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.unmount() {
            self.device
                .log
                .warning(&format!("unmount failed (ignored): {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, Level, RecordingLog, Workspace};
    use std::fs;

    struct Setup {
        ws: Workspace,
        runner: Rc<FakeRunner>,
        log: Rc<RecordingLog>,
    }

    impl Setup {
        fn new() -> Self {
            Self {
                ws: Workspace::new(),
                runner: FakeRunner::new(),
                log: RecordingLog::new(),
            }
        }

        fn device(&self) -> BootDevice {
            let target = DeviceTarget {
                device: "/dev/sdb".into(),
                partition: "1".into(),
                mountpoint: self.ws.boot().to_path_buf(),
            };
            BootDevice::new(
                target,
                BootloaderTools::default(),
                self.runner.clone(),
                self.log.clone(),
            )
        }

        fn install(&self) -> InstallationOutcome {
            let mut installer = self.ws.installer(self.runner.clone(), self.log.clone());
            let mut device = self.device();
            let outcome = device.install_kernel(&mut installer);
            assert_eq!(device.state(), MountState::Unmounted);
            outcome
        }
    }

    #[test]
    fn full_sequence_runs_in_order() {
        let s = Setup::new();
        let outcome = s.install();
        assert!(outcome.succeeded(), "{:?}", outcome);
        assert_eq!(
            outcome.bootloader_modes,
            vec![FirmwareMode::Bios, FirmwareMode::Uefi]
        );

        let boot = s.ws.boot().display().to_string();
        assert_eq!(
            s.runner.calls(),
            vec![
                format!("mount /dev/sdb1 {}", boot),
                format!("mountpoint -q {}", boot),
                "make modules_install".to_string(),
                format!("make install INSTALL_PATH={}", boot),
                "genkernel --luks --lvm initramfs".to_string(),
                format!("grub-install --target=i386-pc --boot-directory={} /dev/sdb", boot),
                format!(
                    "grub-install --target=x86_64-efi --efi-directory={0} --boot-directory={0} --removable --no-nvram",
                    boot
                ),
                format!("grub-mkconfig -o {}/grub/grub.cfg", boot),
                format!("umount {}", boot),
            ]
        );
        assert!(s.ws.boot().join("grub").is_dir());
        assert_eq!(outcome.artifacts.unwrap().files.len(), 3);
    }

    #[test]
    fn mount_failure_still_unmounts_once() {
        let s = Setup::new();
        s.runner.fail_when("mount /dev/sdb1", 32);
        let outcome = s.install();

        assert_eq!(outcome.failed_stage, Some(InstallStage::Mount));
        assert_eq!(s.runner.count("umount"), 1);
        assert_eq!(s.runner.count("make"), 0);
        assert_eq!(s.runner.count("grub-install"), 0);
    }

    #[test]
    fn unverified_mount_is_a_mount_failure() {
        let s = Setup::new();
        s.runner.fail_when("mountpoint -q", 1);
        let outcome = s.install();
        assert_eq!(outcome.failed_stage, Some(InstallStage::Mount));
        assert_eq!(s.runner.count("umount"), 1);
    }

    #[test]
    fn install_failure_is_a_copy_failure() {
        let s = Setup::new();
        s.runner.fail_when("genkernel", 1);
        let outcome = s.install();
        assert_eq!(outcome.failed_stage, Some(InstallStage::Copy));
        assert!(outcome.error.unwrap().contains("genkernel"));
        assert_eq!(s.runner.count("umount"), 1);
    }

    #[test]
    fn one_bootloader_mode_is_enough() {
        let s = Setup::new();
        s.runner.fail_when("--target=i386-pc", 1);
        let outcome = s.install();

        assert!(outcome.succeeded());
        assert_eq!(outcome.bootloader_modes, vec![FirmwareMode::Uefi]);
        assert_eq!(s.runner.count("grub-mkconfig"), 1);
        assert!(s.log.contains("BIOS bootloader install failed"));
    }

    #[test]
    fn bios_failure_does_not_skip_uefi() {
        let s = Setup::new();
        s.runner.fail_when("grub-install", 1);
        let outcome = s.install();

        assert_eq!(outcome.failed_stage, Some(InstallStage::BootloaderBios));
        assert_eq!(s.runner.count("grub-install"), 2);
        assert_eq!(s.runner.count("grub-mkconfig"), 0);
        assert_eq!(s.runner.count("umount"), 1);
    }

    #[test]
    fn regeneration_failure_is_reported() {
        let s = Setup::new();
        s.runner.fail_when("grub-mkconfig", 1);
        let outcome = s.install();
        assert_eq!(outcome.failed_stage, Some(InstallStage::ConfigRegeneration));
        assert_eq!(s.runner.count("umount"), 1);
    }

    #[test]
    fn unmount_failure_is_only_a_warning() {
        let s = Setup::new();
        s.runner.fail_when("umount", 32);
        let outcome = s.install();
        assert!(outcome.succeeded());
        assert!(s
            .log
            .at(Level::Warning)
            .iter()
            .any(|m| m.contains("unmount failed")));
    }

    #[test]
    fn interrupt_is_flagged_and_device_unmounted() {
        let s = Setup::new();
        s.runner.interrupt_when("make install");
        let outcome = s.install();
        assert!(outcome.interrupted);
        assert_eq!(outcome.failed_stage, Some(InstallStage::Copy));
        assert_eq!(s.runner.count("umount"), 1);
    }

    #[test]
    fn interrupted_bios_install_skips_uefi() {
        let s = Setup::new();
        s.runner.interrupt_when("--target=i386-pc");
        let outcome = s.install();

        assert!(outcome.interrupted);
        assert_eq!(outcome.failed_stage, Some(InstallStage::BootloaderBios));
        assert_eq!(s.runner.count("grub-install"), 1);
        assert_eq!(s.runner.count("grub-mkconfig"), 0);
        assert_eq!(s.runner.count("umount"), 1);
    }

    #[test]
    fn existing_grub2_directory_is_used() {
        let s = Setup::new();
        fs::create_dir_all(s.ws.boot().join("grub2")).unwrap();
        let device = s.device();
        assert_eq!(
            device.regenerate_config().unwrap(),
            s.ws.boot().join("grub2/grub.cfg")
        );
        assert!(!s.ws.boot().join("grub").exists());
    }

    #[test]
    fn listing_is_logged_before_and_after() {
        let s = Setup::new();
        s.install();
        assert!(s.log.contains("before installation"));
        assert!(s.log.contains("after installation"));
        assert!(s.log.contains("vmlinuz-6.6.1-2024_01_01-10_00_00"));
    }

    #[test]
    fn missing_device_node_only_warns() {
        let log = RecordingLog::new();
        let target = DeviceTarget::new(
            "/dev/definitely-not-a-disk",
            "9",
            "/mnt/boot",
            log.as_ref(),
        );
        assert_eq!(target.partition_node(), "/dev/definitely-not-a-disk9");
        assert!(log.contains("device /dev/definitely-not-a-disk9 not found"));
    }

    #[test]
    fn targets_follow_config_order() {
        let ws = Workspace::new();
        let log = RecordingLog::new();
        let targets = DeviceTarget::from_config(&ws.config, log.as_ref());
        let nodes: Vec<String> = targets.iter().map(DeviceTarget::partition_node).collect();
        assert_eq!(nodes, vec!["/dev/sdb1", "/dev/sdc1"]);
        assert!(targets.iter().all(|t| t.mountpoint == ws.config.boot_mountpoint));
    }
}
