//! msblflash CLI - Command-line tool for updating Maxim MSBL bootloaders.
//!
//! ## Features
//!
//! - Flash `.msbl` containers or raw `.bin` images through a host MCU
//! - Mass flashing from host RAM
//! - AES key loading for encrypted images
//! - Persistent bootloader configuration
//! - Offline image inspection and packing
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use msblflash::{CommInterface, EblMode, HostConfig, SerialConfig};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Exit code for runtime failures.
const EXIT_FAILURE: i32 = 1;
/// Exit code for invalid usage.
const EXIT_USAGE: i32 = 2;
/// Exit code after Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid arguments or missing required settings.
    #[error("{0}")]
    Usage(String),
    /// The user cancelled the operation.
    #[error("{0}")]
    Cancelled(String),
}

/// msblflash - Update firmware on Maxim microcontrollers through an MSBL
/// host bootloader.
///
/// Environment variables:
///   MSBLFLASH_PORT      - Default serial port
///   MSBLFLASH_BAUD      - Default baud rate (default: 115200)
///   MSBLFLASH_TIMEOUT   - Serial read timeout in seconds (default: 300)
#[derive(Parser)]
#[command(name = "msblflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the host MCU.
    #[arg(short, long, global = true, env = "MSBLFLASH_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "MSBLFLASH_BAUD")]
    baud: Option<u32>,

    /// Interface between host MCU and target.
    #[arg(short = 'c', long, global = true, value_enum)]
    comm_interface: Option<Interface>,

    /// Enter the bootloader through the EBL GPIO pin instead of the
    /// startup timeout.
    #[arg(short = 'e', long, global = true)]
    ebl_mode: bool,

    /// Command wait-time multiplier on the host (0-50) [default: 1].
    #[arg(short = 'd', long, global = true, value_parser = clap::value_parser!(u8).range(0..=50))]
    delay_factor: Option<u8>,

    /// Serial read timeout in seconds [default: 300].
    #[arg(long, global = true, env = "MSBLFLASH_TIMEOUT", value_name = "SECS")]
    timeout: Option<u64>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Host-to-target interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Interface {
    /// UART.
    Uart,
    /// I2C.
    I2c,
    /// SPI.
    Spi,
}

impl From<Interface> for CommInterface {
    fn from(interface: Interface) -> Self {
        match interface {
            Interface::Uart => CommInterface::Uart,
            Interface::I2c => CommInterface::I2c,
            Interface::Spi => CommInterface::Spi,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a firmware image (.msbl or .bin) to the target.
    Flash {
        /// Firmware file.
        firmware: PathBuf,

        /// AES key file to load before flashing.
        #[arg(short = 'k', long = "key", value_name = "KEY")]
        key: Option<PathBuf>,

        /// Stage the image in host RAM and flash several targets.
        #[arg(short = 'm', long)]
        mass_flash: bool,

        /// Reset the target afterwards instead of starting the application.
        #[arg(short, long)]
        reset: bool,

        /// Partial page send size (1-8208).
        #[arg(short = 's', long, value_parser = clap::value_parser!(u16).range(1..=8208))]
        send_size: Option<u16>,

        /// Target name written into headers of raw images.
        #[arg(long, value_name = "NAME")]
        target: Option<String>,
    },

    /// Load an AES key into the bootloader.
    LoadKey {
        /// Key file.
        key: PathBuf,
    },

    /// Write and read back the persistent bootloader configuration.
    Configure {
        /// Bootloader configuration file ([BootConfig] section). Without it
        /// the current configuration is only read back.
        boot_config: Option<PathBuf>,

        /// Reset the target afterwards instead of starting the application.
        #[arg(short, long)]
        reset: bool,

        /// Save the read-back configuration to a file.
        #[arg(long, value_name = "PATH")]
        save: Option<PathBuf>,
    },

    /// Show information about a firmware image.
    Info {
        /// Firmware file (.msbl or .bin).
        firmware: PathBuf,

        /// Output in JSON format.
        #[arg(long)]
        json: bool,

        /// Target name used when wrapping raw images.
        #[arg(long, value_name = "NAME")]
        target: Option<String>,
    },

    /// Wrap a raw binary into an MSBL container.
    Pack {
        /// Raw binary (.bin).
        bin: PathBuf,

        /// Output file [default: input with .msbl extension].
        #[arg(short, long, value_name = "MSBL")]
        output: Option<PathBuf>,

        /// Target name written into the header.
        #[arg(long, value_name = "NAME")]
        target: Option<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
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

    debug!(
        "msblflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        if is_local_format_error(&err) {
            eprintln!(
                "{}",
                style("Note: rejected by msblflash, not reported by the device").dim()
            );
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            key,
            mass_flash,
            reset,
            send_size,
            target,
        } => commands::flash::cmd_flash(
            cli,
            &config,
            &commands::flash::FlashArgs {
                firmware,
                key: key.as_deref(),
                mass_flash: *mass_flash,
                reset: *reset,
                send_size: send_size.or(config.flash.send_size),
                target: target
                    .as_deref()
                    .or(config.flash.target.as_deref()),
            },
        ),
        Commands::LoadKey { key } => commands::flash::cmd_load_key(cli, &config, key),
        Commands::Configure {
            boot_config,
            reset,
            save,
        } => commands::configure::cmd_configure(
            cli,
            &config,
            boot_config.as_deref(),
            *reset,
            save.as_deref(),
        ),
        Commands::Info {
            firmware,
            json,
            target,
        } => commands::info::cmd_info(
            firmware,
            *json,
            target
                .as_deref()
                .or(config.flash.target.as_deref()),
        ),
        Commands::Pack {
            bin,
            output,
            target,
        } => commands::info::cmd_pack(
            cli,
            bin,
            output.as_deref(),
            target
                .as_deref()
                .or(config.flash.target.as_deref()),
        ),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// First Ctrl-C asks the current operation to stop; the second one exits.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(EXIT_CANCELLED);
        }
        eprintln!("\nInterrupted, stopping at the next safe point (Ctrl-C again to abort)");
    });
    if let Err(err) = result {
        debug!("Could not install Ctrl-C handler: {err}");
    }
    msblflash::set_interrupt_checker(was_interrupted);
}

/// Map an error chain to the process exit code.
fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => EXIT_USAGE,
                CliError::Cancelled(_) => EXIT_CANCELLED,
            };
        }
        if let Some(msblflash::Error::Cancelled(_)) = cause.downcast_ref::<msblflash::Error>() {
            return EXIT_CANCELLED;
        }
    }
    EXIT_FAILURE
}

/// Whether the failure is a file or value check done on the host side.
fn is_local_format_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<msblflash::Error>())
        .any(msblflash::Error::is_format_error)
}

/// Serial port from CLI args, environment or config.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| {
            config
                .connection
                .port
                .clone()
        })
        .ok_or_else(|| {
            CliError::Usage(
                "no serial port given (use --port, MSBLFLASH_PORT or the config file)".into(),
            )
            .into()
        })
}

/// Serial settings resolved from CLI args and config.
fn serial_config(cli: &Cli, config: &Config) -> Result<SerialConfig> {
    let port = get_port(cli, config)?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(msblflash::port::DEFAULT_BAUD);
    let timeout = cli
        .timeout
        .or(config.connection.timeout)
        .map_or(msblflash::port::DEFAULT_TIMEOUT, Duration::from_secs);
    Ok(SerialConfig::new(port, baud).with_timeout(timeout))
}

/// Host link settings resolved from CLI args and config.
fn host_config(cli: &Cli, config: &Config) -> Result<HostConfig> {
    let comm_interface = match cli.comm_interface {
        Some(interface) => Some(interface.into()),
        None => config
            .host
            .comm_interface
            .as_deref()
            .map(str::parse::<CommInterface>)
            .transpose()?,
    };
    let ebl_mode = if cli.ebl_mode || config.host.ebl_gpio {
        EblMode::Gpio
    } else {
        EblMode::Timeout
    };
    let host = HostConfig {
        ebl_mode,
        delay_factor: cli
            .delay_factor
            .or(config.host.delay_factor)
            .unwrap_or(1),
        comm_interface,
    };
    host.validate()?;
    Ok(host)
}
