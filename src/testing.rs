//! Test doubles for the logging and process capabilities.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::{BootloaderTools, BuildConfig, FlashDevice, DEFAULT_KERNEL_IMAGE};
use crate::error::{Error, Result};
use crate::log::Log;
use crate::process::{self, Cmd, CmdOutput, Runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Info,
    Warning,
    Error,
}

#[derive(Default)]
pub(crate) struct RecordingLog {
    entries: RefCell<Vec<(Level, String)>>,
}

impl RecordingLog {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|(_, m)| m.clone()).collect()
    }

    pub(crate) fn at(&self, level: Level) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.entries.borrow().iter().any(|(_, m)| m.contains(needle))
    }
}

impl Log for RecordingLog {
    fn info(&self, msg: &str) {
        self.entries.borrow_mut().push((Level::Info, msg.to_string()));
    }

    fn warning(&self, msg: &str) {
        self.entries
            .borrow_mut()
            .push((Level::Warning, msg.to_string()));
    }

    fn error(&self, msg: &str) {
        self.entries.borrow_mut().push((Level::Error, msg.to_string()));
    }
}

#[derive(Clone, Copy)]
enum Response {
    Exit(i32),
    Interrupt,
}

struct Rule {
    pattern: String,
    occurrence: Option<usize>,
    seen: usize,
    response: Response,
}

/// Scripted [`Runner`]: records every command line and answers with exit
/// code 0 unless a rule matches.
///
/// Like the real runner, once an interrupt has been reported only
/// [`Cmd::always_run`] commands are started (and recorded).
#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: RefCell<Vec<String>>,
    rules: RefCell<Vec<Rule>>,
    interrupted: Cell<bool>,
}

impl FakeRunner {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Every command line containing `pattern` exits with `exit_code`.
    pub(crate) fn fail_when(&self, pattern: &str, exit_code: i32) {
        self.push_rule(pattern, None, Response::Exit(exit_code));
    }

    /// Only the `n`-th (zero based) command line containing `pattern` fails.
    pub(crate) fn fail_nth(&self, pattern: &str, n: usize, exit_code: i32) {
        self.push_rule(pattern, Some(n), Response::Exit(exit_code));
    }

    /// The first command line containing `pattern` reports a user interrupt.
    pub(crate) fn interrupt_when(&self, pattern: &str) {
        self.push_rule(pattern, Some(0), Response::Interrupt);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of recorded command lines starting with `prefix`.
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn push_rule(&self, pattern: &str, occurrence: Option<usize>, response: Response) {
        self.rules.borrow_mut().push(Rule {
            pattern: pattern.to_string(),
            occurrence,
            seen: 0,
            response,
        });
    }

    fn respond(&self, cmd: &Cmd) -> Result<CmdOutput> {
        if self.interrupted.get() && !cmd.runs_when_interrupted() {
            return Err(Error::Interrupted);
        }
        let line = cmd.to_string();
        self.calls.borrow_mut().push(line.clone());

        let mut response = None;
        for rule in self.rules.borrow_mut().iter_mut() {
            if !line.contains(&rule.pattern) {
                continue;
            }
            let index = rule.seen;
            rule.seen += 1;
            if rule.occurrence.is_some_and(|n| n != index) {
                continue;
            }
            response.get_or_insert(rule.response);
        }

        let exit_code = match response {
            Some(Response::Interrupt) => {
                self.interrupted.set(true);
                return Err(Error::Interrupted);
            }
            Some(Response::Exit(code)) => code,
            None => 0,
        };
        let output = CmdOutput {
            exit_code,
            text: String::new(),
        };
        process::finish(cmd, output, false)
    }
}

impl Runner for FakeRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
        self.respond(cmd)
    }

    fn run_interactive(&self, cmd: &Cmd) -> Result<CmdOutput> {
        self.respond(cmd)
    }
}

/// Configuration rooted in scratch directories, with two flash devices.
pub(crate) fn config(linux_dir: &Path, boot_dir: &Path, backup_dir: &Path) -> BuildConfig {
    BuildConfig {
        linux_dir: linux_dir.to_path_buf(),
        backup_config_dir: backup_dir.to_path_buf(),
        boot_mountpoint: boot_dir.to_path_buf(),
        initramfs_args: vec!["--luks".to_string(), "--lvm".to_string()],
        build_jobs: 4,
        flash_devices: vec![
            FlashDevice {
                device: "/dev/sdb".to_string(),
                partition: "1".to_string(),
            },
            FlashDevice {
                device: "/dev/sdc".to_string(),
                partition: "1".to_string(),
            },
        ],
        kernel_image: PathBuf::from(DEFAULT_KERNEL_IMAGE),
        initramfs_tool: "genkernel".to_string(),
        bootloader: BootloaderTools::default(),
    }
}

/// Scratch kernel tree (built, release `6.6.1`) and a boot directory that
/// already holds the files `make install` and the initramfs tool would leave.
pub(crate) struct Workspace {
    _temp: tempfile::TempDir,
    pub(crate) config: BuildConfig,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let linux = temp.path().join("linux");
        let boot = temp.path().join("boot");
        let config = config(&linux, &boot, &temp.path().join("backups"));

        std::fs::create_dir_all(linux.join("include/config")).unwrap();
        std::fs::write(linux.join("include/config/kernel.release"), "6.6.1\n").unwrap();
        let image = config.kernel_image_path();
        std::fs::create_dir_all(image.parent().unwrap()).unwrap();
        std::fs::write(&image, b"bzImage").unwrap();

        std::fs::create_dir_all(&boot).unwrap();
        std::fs::write(boot.join("vmlinuz"), b"kernel").unwrap();
        std::fs::write(boot.join("System.map"), b"symbols").unwrap();
        std::fs::write(boot.join("initramfs-6.6.1.img"), b"initrd").unwrap();

        Self {
            _temp: temp,
            config,
        }
    }

    pub(crate) fn boot(&self) -> &Path {
        &self.config.boot_mountpoint
    }

    pub(crate) fn installer(
        &self,
        runner: Rc<FakeRunner>,
        log: Rc<RecordingLog>,
    ) -> crate::kernel::ArtifactInstaller {
        let state = crate::kernel::KernelState::new(&self.config, log.clone())
            .pin_timestamp("2024_01_01-10_00_00");
        crate::kernel::ArtifactInstaller::new(&self.config, runner, log).with_state(state)
    }
}
