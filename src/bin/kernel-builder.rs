use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{bail, Result};
use kernel_builder::boot::DeviceTarget;
use kernel_builder::config::{resolve_config_path, BuildConfig};
use kernel_builder::error::{EXIT_CONFIG, EXIT_INTERRUPTED, EXIT_NOT_BUILT, EXIT_USAGE};
use kernel_builder::kernel::ArtifactInstaller;
use kernel_builder::log::{Log, TracingLog};
use kernel_builder::preflight;
use kernel_builder::process::{Runner, SystemRunner};
use kernel_builder::session::InstallationSession;
use kernel_builder::{interrupt, Error};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Configure,
    Build,
    Install,
    Check,
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    command: Command,
    config: Option<PathBuf>,
}

fn usage() -> &'static str {
    "Usage:\n  kernel-builder <configure|build|install|check> [-c|--config <path>]\n\n\
     Commands:\n  configure  back up .config and run `make nconfig`\n  \
     build      compile the kernel image and modules\n  \
     install    install the built kernel to every configured boot device\n  \
     check      report missing host tools, device nodes and build state"
}

fn parse_command(value: &str) -> Result<Command> {
    match value {
        "configure" => Ok(Command::Configure),
        "build" => Ok(Command::Build),
        "install" => Ok(Command::Install),
        "check" => Ok(Command::Check),
        other => bail!(
            "unknown command '{}'; expected configure, build, install or check",
            other
        ),
    }
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let (command, config) = match args.as_slice() {
        [command] => (command, None),
        [command, flag, path] | [flag, path, command] if matches!(*flag, "-c" | "--config") => {
            (command, Some(PathBuf::from(path)))
        }
        [] => bail!("missing command"),
        _ => bail!("unexpected arguments: {}", args.join(" ")),
    };
    Ok(Invocation {
        command: parse_command(command)?,
        config,
    })
}

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{}\n\n{}", e, usage());
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = interrupt::install_handler() {
        tracing::warn!("could not install SIGINT handler: {}", e);
    }

    let config_path = resolve_config_path(invocation.config.as_deref());
    let config = match BuildConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let log: Rc<dyn Log> = Rc::new(TracingLog);
    let runner: Rc<dyn Runner> = Rc::new(SystemRunner::new(log.clone()));

    match run(invocation.command, &config, runner, log) {
        Ok(code) => ExitCode::from(code),
        Err(Error::Interrupted) => {
            tracing::warn!("interrupted by user");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(
    command: Command,
    config: &BuildConfig,
    runner: Rc<dyn Runner>,
    log: Rc<dyn Log>,
) -> kernel_builder::Result<u8> {
    let mut installer = ArtifactInstaller::new(config, runner.clone(), log.clone());
    match command {
        Command::Configure => installer.configure()?,
        Command::Build => installer.build()?,
        Command::Install => {
            let targets = DeviceTarget::from_config(config, log.as_ref());
            let session = InstallationSession::new(config, runner, log);
            let report = session.install_all(&mut installer, &targets)?;
            return Ok(report.exit_code());
        }
        Command::Check => return Ok(check(config, &installer, log.as_ref())),
    }
    Ok(0)
}

/// Report what would stop an install without changing anything.
fn check(config: &BuildConfig, installer: &ArtifactInstaller, log: &dyn Log) -> u8 {
    let mut code = 0;

    match preflight::check_host_tools(config) {
        Ok(()) => log.info("all host tools found"),
        Err(e) => {
            log.error(&e.to_string());
            code = EXIT_CONFIG;
        }
    }

    for device in &config.flash_devices {
        let node = format!("{}{}", device.device, device.partition);
        if Path::new(&node).exists() {
            log.info(&format!("device {} present", node));
        } else {
            log.warning(&format!("device {} not found", node));
        }
    }

    let state = installer.state();
    if state.is_built() {
        log.info(&format!("kernel {} is built", state.version()));
    } else {
        log.warning(&format!(
            "kernel not built: {} missing",
            state.image_path().display()
        ));
        if code == 0 {
            code = EXIT_NOT_BUILT;
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn command_alone_uses_default_config() {
        assert_eq!(
            parse_args(&args(&["build"])).unwrap(),
            Invocation {
                command: Command::Build,
                config: None
            }
        );
    }

    #[test]
    fn config_flag_before_or_after_command() {
        let expected = Invocation {
            command: Command::Install,
            config: Some(PathBuf::from("/etc/kb.json")),
        };
        assert_eq!(
            parse_args(&args(&["install", "-c", "/etc/kb.json"])).unwrap(),
            expected
        );
        assert_eq!(
            parse_args(&args(&["--config", "/etc/kb.json", "install"])).unwrap(),
            expected
        );
    }

    #[test]
    fn bad_invocations_are_rejected() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["deploy"])).is_err());
        assert!(parse_args(&args(&["build", "-x", "path"])).is_err());
        assert!(parse_args(&args(&["build", "extra"])).is_err());
    }
}
