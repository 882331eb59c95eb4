//! Bootloader configuration directory discovery.
//!
//! Distros disagree on where GRUB keeps its files (`grub` vs `grub2`, with or
//! without a leading `boot/` when the volume is not mounted at `/boot`). The
//! candidates are probed in a fixed order and the first existing directory
//! wins. This picks a location; it does not prove that the firmware will read
//! it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Probe order, relative to the mounted volume.
pub const CONFIG_DIR_CANDIDATES: &[&str] = &["grub", "grub2", "boot/grub", "boot/grub2"];

/// Used (and created) when no candidate exists.
pub const DEFAULT_CONFIG_DIR: &str = "grub";

pub fn first_existing(root: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| root.join(candidate))
        .find(|path| path.is_dir())
}

/// First existing candidate under `root`, else `root/default` (created).
pub fn locate_or_create(root: &Path, candidates: &[&str], default: &str) -> io::Result<PathBuf> {
    if let Some(found) = first_existing(root, candidates) {
        return Ok(found);
    }
    let fallback = root.join(default);
    fs::create_dir_all(&fallback)?;
    Ok(fallback)
}
