//! Versioned artifact naming.
//!
//! Every file produced by one run carries the same `-<version>-<timestamp>`
//! suffix, so a kernel image, its symbol map and its initramfs can be matched
//! up by name alone.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    KernelImage,
    SymbolMap,
    Initramfs,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::SymbolMap,
        ArtifactKind::KernelImage,
        ArtifactKind::Initramfs,
    ];

    /// Name of the file `make install` / the initramfs tool leaves in the boot
    /// directory.
    pub fn source_name(self, version: &str) -> String {
        match self {
            ArtifactKind::KernelImage => "vmlinuz".to_string(),
            ArtifactKind::SymbolMap => "System.map".to_string(),
            ArtifactKind::Initramfs => format!("initramfs-{}.img", version),
        }
    }

    pub fn versioned_name(self, version: &str, timestamp: &str) -> String {
        let source = self.source_name(version);
        match self {
            // `.map` is part of the canonical name (`System.map-<release>`).
            ArtifactKind::SymbolMap => format!("{}-{}-{}", source, version, timestamp),
            _ => versioned_name(&source, version, timestamp),
        }
    }
}

/// Insert `-<version>-<timestamp>` before the extension of `file_name`, or
/// append it when there is no extension.
///
/// ```
/// use kernel_builder::kernel::artifact::versioned_name;
///
/// let ts = "2024_01_01-10_00_00";
/// assert_eq!(versioned_name("vmlinuz", "6.6.1", ts), "vmlinuz-6.6.1-2024_01_01-10_00_00");
/// assert_eq!(
///     versioned_name("initramfs-6.6.1.img", "6.6.1", ts),
///     "initramfs-6.6.1-2024_01_01-10_00_00.img"
/// );
/// ```
pub fn versioned_name(file_name: &str, version: &str, timestamp: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{}-{}-{}.{}", stem, version, timestamp, ext)
        }
        _ => format!("{}-{}-{}", file_name, version, timestamp),
    }
}

/// One versioned copy made in the boot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub kind: ArtifactKind,
    pub source: PathBuf,
    pub target: PathBuf,
    pub sha256: String,
}

/// Output of one install step: the shared version/timestamp pair and the
/// files actually staged. Not every configuration produces every kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArtifactSet {
    pub version: String,
    pub timestamp: String,
    pub files: Vec<StagedArtifact>,
}

impl KernelArtifactSet {
    pub fn get(&self, kind: ArtifactKind) -> Option<&StagedArtifact> {
        self.files.iter().find(|file| file.kind == kind)
    }
}
