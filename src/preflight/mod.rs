//! Preflight checks for kernel builds and installs.
//!
//! Validates that the host has the tools a run will shell out to, so a
//! missing `grub-install` is reported up front instead of after the kernel
//! has been compiled.
//!
//! # Example
//!
//! ```rust
//! use kernel_builder::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("grub-install") {
//!     println!("grub not installed");
//! }
//!
//! let tools = &[("make", "make"), ("mount", "util-linux")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::config::BuildConfig;

/// Check if a command exists on the host system (searches `PATH`).
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every run needs regardless of configuration, as
/// (command_name, package_name).
pub const BASE_TOOLS: &[(&str, &str)] = &[
    ("make", "make"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
    ("mountpoint", "util-linux"),
];

/// Everything `config` will invoke: [`BASE_TOOLS`], the initramfs tool and
/// both bootloader tools.
pub fn required_tools(config: &BuildConfig) -> Vec<(String, String)> {
    let mut tools: Vec<(String, String)> = BASE_TOOLS
        .iter()
        .map(|(t, p)| (t.to_string(), p.to_string()))
        .collect();
    tools.push((config.initramfs_tool.clone(), config.initramfs_tool.clone()));
    for tool in [&config.bootloader.install_tool, &config.bootloader.mkconfig_tool] {
        tools.push((tool.clone(), "grub".to_string()));
    }
    tools
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools<T, P>(tools: &[(T, P)]) -> Result<()>
where
    T: AsRef<str>,
    P: AsRef<str>,
{
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool.as_ref()))
        .map(|(tool, package)| format!("  {} (install: {})", tool.as_ref(), package.as_ref()))
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// Check everything [`required_tools`] lists for `config`.
pub fn check_host_tools(config: &BuildConfig) -> Result<()> {
    check_required_tools(&required_tools(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::path::Path;

    #[test]
    fn test_command_exists() {
        // 'ls' should exist on any Unix system
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure() {
        let tools = &[("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err().to_string();
        assert!(err.contains("nonexistent_command_xyz (install: fake-package)"));
    }

    #[test]
    fn test_required_tools_follow_config() {
        let mut config = testing::config(
            Path::new("/usr/src/linux"),
            Path::new("/mnt/boot"),
            Path::new("/tmp/backups"),
        );
        config.initramfs_tool = "dracut".to_string();
        config.bootloader.install_tool = "grub2-install".to_string();

        let names: Vec<String> = required_tools(&config)
            .into_iter()
            .map(|(tool, _)| tool)
            .collect();
        assert_eq!(
            names,
            vec![
                "make",
                "mount",
                "umount",
                "mountpoint",
                "dracut",
                "grub2-install",
                "grub-mkconfig"
            ]
        );
    }
}
