//! Kernel `.config` backups.
//!
//! Each backup is written to `<dir>/.config.<YYYY.MM.DD>-<HH:MM:SS>`. Existing
//! backups are never overwritten: a second backup within the same second gets
//! a `.1`, `.2`, ... suffix. `<dir>/.config.latest` is a rolling copy of the
//! current configuration. Backups are best-effort; failures are logged and
//! never stop a build.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::rc::Rc;

use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::kernel::state::now_local;
use crate::log::Log;

pub const LATEST_NAME: &str = ".config.latest";

pub struct ConfigBackup {
    source: PathBuf,
    dir: PathBuf,
    log: Rc<dyn Log>,
}

impl ConfigBackup {
    pub fn new(source: PathBuf, dir: PathBuf, log: Rc<dyn Log>) -> Self {
        Self { source, dir, log }
    }

    /// Write a timestamped backup of `.config`. Returns the new file, or
    /// `None` if there was nothing to back up or the backup failed.
    pub fn backup(&self) -> Option<PathBuf> {
        self.backup_with_stamp(&backup_stamp(now_local()))
    }

    pub(crate) fn backup_with_stamp(&self, stamp: &str) -> Option<PathBuf> {
        if !self.source.is_file() {
            self.log.info(&format!(
                "{} not found, skipping backup",
                self.source.display()
            ));
            return None;
        }
        match self.write_unique(&format!(".config.{}", stamp)) {
            Ok(path) => {
                self.log
                    .info(&format!("kernel config saved to {}", path.display()));
                Some(path)
            }
            Err(e) => {
                self.log.warning(&format!("config backup failed: {}", e));
                None
            }
        }
    }

    /// Refresh `.config.latest` from the current `.config`.
    pub fn refresh_latest(&self) -> Option<PathBuf> {
        if !self.source.is_file() {
            return None;
        }
        let latest = self.dir.join(LATEST_NAME);
        let result = fs::create_dir_all(&self.dir)
            .and_then(|()| fs::copy(&self.source, &latest))
            .map_err(|e| Error::io(format!("copying to {}", latest.display()), e));
        match result {
            Ok(_) => {
                self.log.info(&format!(
                    "current config copied to {}",
                    latest.display()
                ));
                Some(latest)
            }
            Err(e) => {
                self.log.warning(&format!("config backup failed: {}", e));
                None
            }
        }
    }

    fn write_unique(&self, base: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::io(format!("creating {}", self.dir.display()), e))?;

        let mut src = File::open(&self.source)
            .map_err(|e| Error::io(format!("opening {}", self.source.display()), e))?;

        let mut attempt = 0u32;
        loop {
            let path = match attempt {
                0 => self.dir.join(base),
                n => self.dir.join(format!("{}.{}", base, n)),
            };
            attempt += 1;
            let mut dst = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::io(format!("creating {}", path.display()), e)),
            };
            if let Err(e) = io::copy(&mut src, &mut dst) {
                // A truncated file would pass for a valid backup.
                drop(dst);
                let _ = fs::remove_file(&path);
                return Err(Error::io(format!("writing {}", path.display()), e));
            }
            return Ok(path);
        }
    }
}

/// `%Y.%m.%d-%H:%M:%S`, the suffix of timestamped backups.
pub fn backup_stamp(at: OffsetDateTime) -> String {
    format!(
        "{:04}.{:02}.{:02}-{:02}:{:02}:{:02}",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}
