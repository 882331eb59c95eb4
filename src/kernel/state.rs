//! Kernel build state: built-ness, version and build timestamp.
//!
//! Version and timestamp are resolved on first access and cached for the
//! lifetime of the [`KernelState`], so every artifact produced in one run
//! shares the same suffix.

use std::cell::OnceCell;
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use time::OffsetDateTime;

use crate::config::BuildConfig;
use crate::log::Log;

/// Returned by [`KernelState::version`] when no source yields a version.
pub const UNKNOWN_VERSION: &str = "unknown";

const RELEASE_FILE: &str = "include/config/kernel.release";
const VMLINUX: &str = "vmlinux";
const VERSION_BANNER: &[u8] = b"Linux version ";
const SCAN_CHUNK: usize = 64 * 1024;
/// Bytes kept after a banner hit so the release string is complete.
const MAX_RELEASE_LEN: usize = 256;

pub struct KernelState {
    source_dir: PathBuf,
    image: PathBuf,
    built_this_run: bool,
    version: OnceCell<String>,
    timestamp: OnceCell<String>,
    log: Rc<dyn Log>,
}

impl KernelState {
    pub fn new(config: &BuildConfig, log: Rc<dyn Log>) -> Self {
        Self {
            source_dir: config.linux_dir.clone(),
            image: config.kernel_image_path(),
            built_this_run: false,
            version: OnceCell::new(),
            timestamp: OnceCell::new(),
            log,
        }
    }

    /// Fix the build timestamp instead of reading the clock on first use.
    pub fn pin_timestamp(self, timestamp: impl Into<String>) -> Self {
        let _ = self.timestamp.set(timestamp.into());
        self
    }

    pub fn mark_built(&mut self) {
        self.built_this_run = true;
    }

    /// Whether a kernel is available for installation.
    ///
    /// True after [`mark_built`](Self::mark_built), otherwise falls back to
    /// checking for the configured kernel image on disk. The fallback only
    /// knows one filename: a build that used a different output layout is
    /// reported as not built.
    pub fn is_built(&self) -> bool {
        self.built_this_run || self.image.is_file()
    }

    /// Kernel image the on-disk heuristic looks for.
    pub fn image_path(&self) -> &Path {
        &self.image
    }

    /// Kernel release string, e.g. `6.6.1-gentoo`. Never fails; falls back to
    /// [`UNKNOWN_VERSION`].
    pub fn version(&self) -> &str {
        self.version.get_or_init(|| self.detect_version())
    }

    /// Build timestamp in `%Y_%m_%d-%H_%M_%S` form.
    pub fn build_timestamp(&self) -> &str {
        self.timestamp.get_or_init(now_timestamp)
    }

    fn detect_version(&self) -> String {
        if let Some(version) = read_release_file(&self.source_dir) {
            return version;
        }

        let vmlinux = self.source_dir.join(VMLINUX);
        let found = File::open(&vmlinux).and_then(|file| find_version_banner(BufReader::new(file)));
        match found {
            Ok(found) => {
                if let Some(version) = found {
                    self.log.info(&format!(
                        "kernel version {} taken from {}",
                        version,
                        vmlinux.display()
                    ));
                    return version;
                }
                self.log
                    .warning(&format!("no version banner in {}", vmlinux.display()));
            }
            Err(e) => self
                .log
                .warning(&format!("cannot read {}: {}", vmlinux.display(), e)),
        }

        self.log.warning(&format!(
            "kernel version unknown; artifacts will be named with '{}'",
            UNKNOWN_VERSION
        ));
        UNKNOWN_VERSION.to_string()
    }
}

/// Read `include/config/kernel.release` from the source tree.
pub fn read_release_file(source_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(source_dir.join(RELEASE_FILE)).ok()?;
    let version = content.trim();
    (!version.is_empty()).then(|| version.to_string())
}

/// Find the `Linux version <release>` banner in a kernel binary.
pub fn scan_version_banner(bytes: &[u8]) -> Option<String> {
    let start = bytes
        .windows(VERSION_BANNER.len())
        .position(|window| window == VERSION_BANNER)?
        + VERSION_BANNER.len();
    let rest = &bytes[start..];
    let end = rest
        .iter()
        .position(|b| b.is_ascii_whitespace() || *b == 0)
        .unwrap_or(rest.len());
    let version = std::str::from_utf8(&rest[..end]).ok()?;
    (!version.is_empty()).then(|| version.to_string())
}

/// Stream `reader` looking for the version banner, holding at most one chunk
/// plus the banner overlap in memory.
pub fn find_version_banner<R: Read>(mut reader: R) -> io::Result<Option<String>> {
    let mut chunk = vec![0u8; SCAN_CHUNK];
    let mut window: Vec<u8> = Vec::with_capacity(SCAN_CHUNK + MAX_RELEASE_LEN);
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        window.extend_from_slice(&chunk[..read]);
        let eof = read == 0;

        if let Some(pos) = window
            .windows(VERSION_BANNER.len())
            .position(|w| w == VERSION_BANNER)
        {
            let tail = window.len() - pos - VERSION_BANNER.len();
            if eof || tail >= MAX_RELEASE_LEN {
                return Ok(scan_version_banner(&window[pos..]));
            }
            window.drain(..pos);
            continue;
        }
        if eof {
            return Ok(None);
        }
        let keep = VERSION_BANNER.len() - 1;
        if window.len() > keep {
            window.drain(..window.len() - keep);
        }
    }
}

pub fn format_timestamp(at: OffsetDateTime) -> String {
    format!(
        "{:04}_{:02}_{:02}-{:02}_{:02}_{:02}",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Local wall-clock time, or UTC when the local offset can't be determined.
pub(crate) fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn now_timestamp() -> String {
    format_timestamp(now_local())
}
