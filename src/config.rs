//! Build configuration loading and validation.
//!
//! The configuration is a JSON document (TOML is accepted when the file has a
//! `.toml` extension):
//!
//! ```json
//! {
//!   "linux_dir": "/usr/src/linux",
//!   "backup_config_dir": "/root/kernel-configs",
//!   "boot_mountpoint": "/boot",
//!   "initramfs_args": ["--luks", "--lvm"],
//!   "build_jobs": 8,
//!   "flash_devices": [
//!     { "device": "/dev/sdb", "partition": "1" }
//!   ]
//! }
//! ```
//!
//! Everything downstream receives an already validated [`BuildConfig`].

use anyhow::{bail, Context, Result};
use nix::unistd::{access, AccessFlags};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "kernel_builder.json";

/// Relative path of the kernel image inside the source tree.
pub const DEFAULT_KERNEL_IMAGE: &str = "arch/x86/boot/bzImage";

pub const DEFAULT_INITRAMFS_TOOL: &str = "genkernel";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub linux_dir: PathBuf,
    pub backup_config_dir: PathBuf,
    pub boot_mountpoint: PathBuf,
    pub initramfs_args: Vec<String>,
    pub build_jobs: u32,
    pub flash_devices: Vec<FlashDevice>,
    /// Checked by the on-disk "is the kernel built" heuristic.
    #[serde(default = "default_kernel_image")]
    pub kernel_image: PathBuf,
    #[serde(default = "default_initramfs_tool")]
    pub initramfs_tool: String,
    #[serde(default)]
    pub bootloader: BootloaderTools,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlashDevice {
    /// Whole-disk block device, e.g. `/dev/sdb`.
    pub device: String,
    /// Suffix appended to `device` to name the boot partition, e.g. `1`.
    pub partition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BootloaderTools {
    pub install_tool: String,
    pub mkconfig_tool: String,
}

impl Default for BootloaderTools {
    fn default() -> Self {
        Self {
            install_tool: "grub-install".to_string(),
            mkconfig_tool: "grub-mkconfig".to_string(),
        }
    }
}

fn default_kernel_image() -> PathBuf {
    PathBuf::from(DEFAULT_KERNEL_IMAGE)
}

fn default_initramfs_tool() -> String {
    DEFAULT_INITRAMFS_TOOL.to_string()
}

impl BuildConfig {
    /// Read, parse and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("config file not found: {}", path.display());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let config = Self::parse(&contents, ConfigFormat::from_path(path))
            .with_context(|| format!("parsing config '{}'", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating config '{}'", path.display()))?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Json => serde_json::from_str(contents)?,
            ConfigFormat::Toml => toml::from_str(contents)?,
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.build_jobs == 0 {
            bail!("build_jobs must be at least 1");
        }
        if self.boot_mountpoint.as_os_str().is_empty() {
            bail!("boot_mountpoint must not be empty");
        }
        if self.kernel_image.is_absolute() {
            bail!(
                "kernel_image must be relative to linux_dir, got '{}'",
                self.kernel_image.display()
            );
        }
        if self.initramfs_tool.trim().is_empty() {
            bail!("initramfs_tool must not be empty");
        }
        for (index, dev) in self.flash_devices.iter().enumerate() {
            if dev.device.trim().is_empty() {
                bail!("flash_devices[{}].device must not be empty", index);
            }
        }

        if !self.linux_dir.is_dir() {
            bail!(
                "kernel source directory not found: {}",
                self.linux_dir.display()
            );
        }
        if !is_read_writable(&self.linux_dir) {
            bail!(
                "kernel source directory is not readable and writable: {}",
                self.linux_dir.display()
            );
        }
        Ok(())
    }

    /// The kernel's `.config` inside the source tree.
    pub fn dot_config(&self) -> PathBuf {
        self.linux_dir.join(".config")
    }

    pub fn kernel_image_path(&self) -> PathBuf {
        self.linux_dir.join(&self.kernel_image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Resolve the config path from the command line.
///
/// Without an explicit path, `kernel_builder.json` in the working directory
/// wins, then `<user config dir>/kernel-builder/kernel_builder.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("kernel-builder").join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.is_file())
        .unwrap_or(local)
}

fn is_read_writable(path: &Path) -> bool {
    access(path, AccessFlags::R_OK | AccessFlags::W_OK).is_ok()
}
