//! samflash CLI - Command-line tool for programming SAM microcontrollers.
//!
//! ## Features
//!
//! - Program raw binary images into internal flash
//! - Erase flash, select the boot source, reset the device
//! - Show chip and monitor information
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use samflash::{CancelToken, FlowControl, NativePort, SambaSession, SerialConfig};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if progress bars and colors should be used.
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// samflash - program Microchip SAM devices through the SAM-BA monitor.
///
/// Environment variables:
///   SAMFLASH_PORT  - Default serial port
///   SAMFLASH_BAUD  - Default baud rate (default: 921600)
#[derive(Parser)]
#[command(name = "samflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  samflash -p /dev/ttyACM0 info\n  samflash -p /dev/ttyACM0 flash firmware.bin")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port the SAM-BA monitor is attached to.
    #[arg(short, long, global = true, env = "SAMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate [default: 921600].
    #[arg(short, long, global = true, env = "SAMFLASH_BAUD")]
    baud: Option<u32>,

    /// Disable RTS/CTS hardware flow control.
    #[arg(long, global = true)]
    no_flow_control: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Erase flash and program a raw binary image.
    Flash {
        /// Binary image written from the start of flash.
        image: PathBuf,

        /// Skip reading back each page.
        #[arg(long)]
        no_verify: bool,

        /// Leave the boot source unchanged.
        #[arg(long)]
        no_boot: bool,

        /// Do not reset the device when done.
        #[arg(long)]
        no_reset: bool,

        /// RAM routine used to stage page writes (SAM3X only).
        #[arg(long, value_name = "PATH")]
        assist_blob: Option<PathBuf>,
    },

    /// Erase all flash planes.
    Erase,

    /// Show chip id, monitor version and flash geometry.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Select the boot source.
    Boot {
        /// Boot from the ROM monitor instead of flash.
        #[arg(long)]
        rom: bool,
    },

    /// Reset the device.
    Reset,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// CLI-level failures that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Missing or inconsistent arguments.
    #[error("{0}")]
    Usage(String),
}

/// Exit status for a failed run.
///
/// 2 usage, 4 port could not be opened, 130 cancelled, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(CliError::Usage(_)) = err.downcast_ref::<CliError>() {
        return 2;
    }
    match err.downcast_ref::<samflash::Error>() {
        Some(samflash::Error::Cancelled) => 130,
        Some(samflash::Error::Serial(_)) => 4,
        _ => 1,
    }
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "samflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    let config = match cli.config_path {
        Some(ref path) => Config::load_from_path(path),
        None => Config::load(),
    };

    if let Err(err) = run(&cli, &config, &cancel) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli, config: &Config, cancel: &CancelToken) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            image,
            no_verify,
            no_boot,
            no_reset,
            assist_blob,
        } => {
            let options = commands::flash::FlashOptions {
                verify: !no_verify && config.verify(),
                boot: !no_boot && config.boot(),
                reset: !no_reset && config.reset(),
                assist_blob: assist_blob.clone(),
            };
            commands::flash::cmd_flash(cli, config, cancel, image, &options)
        },
        Commands::Erase => commands::flash::cmd_erase(cli, config, cancel),
        Commands::Info { json } => commands::info::cmd_info(cli, config, *json),
        Commands::Boot { rom } => commands::device::cmd_boot(cli, config, !rom),
        Commands::Reset => commands::device::cmd_reset(cli, config),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Resolved serial settings: flags and environment first, then config.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Connection {
    port: String,
    baud: u32,
    flow_control: bool,
}

impl Connection {
    fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let port = cli
            .port
            .clone()
            .or_else(|| config.connection.port.clone())
            .ok_or_else(|| {
                CliError::Usage(
                    "no serial port given; use --port, SAMFLASH_PORT or [connection] port"
                        .to_string(),
                )
            })?;
        Ok(Self {
            port,
            baud: cli
                .baud
                .or(config.connection.baud)
                .unwrap_or(samflash::port::DEFAULT_BAUD),
            flow_control: !cli.no_flow_control && config.flow_control(),
        })
    }

    fn serial_config(&self) -> SerialConfig {
        let flow = if self.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        SerialConfig::new(&self.port, self.baud).with_flow_control(flow)
    }
}

/// Open the port and bring the monitor into binary mode.
fn connect(cli: &Cli, config: &Config) -> Result<SambaSession<NativePort>> {
    let connection = Connection::resolve(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("→").cyan(),
            style(&connection.port).green(),
            connection.baud
        );
    }

    let port = NativePort::open(&connection.serial_config())
        .with_context(|| format!("failed to open {}", connection.port))?;
    let mut session = SambaSession::new(port);
    let version = session
        .initialize()
        .context("SAM-BA monitor did not respond")?;
    debug!("Connected: {}", version.trim_end());
    Ok(session)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from([
            "samflash",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "115200",
            "flash",
            "firmware.bin",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(115_200));
        assert!(matches!(cli.command, Commands::Flash { .. }));
    }

    #[test]
    fn test_cli_parse_flash_with_all_options() {
        let cli = Cli::try_parse_from([
            "samflash",
            "flash",
            "fw.bin",
            "--no-verify",
            "--no-boot",
            "--no-reset",
            "--assist-blob",
            "assist.bin",
        ])
        .unwrap();
        if let Commands::Flash {
            image,
            no_verify,
            no_boot,
            no_reset,
            assist_blob,
        } = cli.command
        {
            assert_eq!(image.to_str().unwrap(), "fw.bin");
            assert!(no_verify);
            assert!(no_boot);
            assert!(no_reset);
            assert_eq!(assist_blob.unwrap().to_str().unwrap(), "assist.bin");
        } else {
            panic!("Expected Flash command");
        }
    }

    #[test]
    fn test_cli_parse_boot_and_reset() {
        let cli = Cli::try_parse_from(["samflash", "boot", "--rom"]).unwrap();
        assert!(matches!(cli.command, Commands::Boot { rom: true }));

        let cli = Cli::try_parse_from(["samflash", "boot"]).unwrap();
        assert!(matches!(cli.command, Commands::Boot { rom: false }));

        let cli = Cli::try_parse_from(["samflash", "reset"]).unwrap();
        assert!(matches!(cli.command, Commands::Reset));
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["samflash", "info", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true }));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["samflash", "erase"]).unwrap();
        assert!(cli.baud.is_none());
        assert!(!cli.quiet);
        assert!(!cli.no_flow_control);
        assert!(cli.config_path.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "samflash",
            "reset",
            "-p",
            "COM3",
            "-vv",
            "--no-flow-control",
            "--config",
            "/tmp/samflash.toml",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.verbose, 2);
        assert!(cli.no_flow_control);
        assert_eq!(
            cli.config_path.as_deref(),
            Some(std::path::Path::new("/tmp/samflash.toml"))
        );
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["samflash"]).is_err());
    }

    #[test]
    fn test_cli_flash_requires_image() {
        assert!(Cli::try_parse_from(["samflash", "flash"]).is_err());
    }

    #[test]
    fn test_connection_prefers_flags_over_config() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyACM1".to_string());
        config.connection.baud = Some(230_400);
        config.connection.flow_control = Some(false);

        let cli = Cli::try_parse_from(["samflash", "-p", "/dev/ttyACM0", "reset"]).unwrap();
        let connection = Connection::resolve(&cli, &config).unwrap();
        assert_eq!(
            connection,
            Connection {
                port: "/dev/ttyACM0".to_string(),
                baud: 230_400,
                flow_control: false,
            }
        );
    }

    #[test]
    fn test_connection_defaults() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyACM1".to_string());

        let cli = Cli::try_parse_from(["samflash", "reset"]).unwrap();
        let connection = Connection::resolve(&cli, &config).unwrap();
        assert_eq!(connection.port, "/dev/ttyACM1");
        assert_eq!(connection.baud, 921_600);
        assert!(connection.flow_control);
        assert_eq!(
            connection.serial_config().flow_control,
            FlowControl::Hardware
        );
    }

    #[test]
    fn test_connection_requires_port() {
        let cli = Cli::try_parse_from(["samflash", "reset"]).unwrap();
        let err = Connection::resolve(&cli, &Config::default()).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(&anyhow::Error::new(samflash::Error::Cancelled)), 130);
        assert_eq!(
            exit_code(&anyhow::Error::new(samflash::Error::UnknownChip(0))),
            1
        );
        let wrapped = anyhow::Error::new(samflash::Error::Cancelled).context("while flashing");
        assert_eq!(exit_code(&wrapped), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
