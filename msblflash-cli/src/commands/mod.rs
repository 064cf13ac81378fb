//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod configure;
pub(crate) mod flash;
pub(crate) mod info;

use anyhow::{Context, Result};
use console::style;
use msblflash::{Bootloader, NativePort};

use crate::config::Config;
use crate::{Cli, host_config, serial_config};

/// Open the host port and configure the host link.
pub(crate) fn open_session(cli: &Cli, config: &Config) -> Result<Bootloader<NativePort>> {
    let serial = serial_config(cli, config)?;
    let host = host_config(cli, config)?;

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            serial.port_name,
            serial.baud_rate
        );
    }

    let mut bl = Bootloader::open(&serial)
        .with_context(|| format!("Failed to open {}", serial.port_name))?;
    bl.configure_host(&host)
        .context("Failed to configure host MCU")?;

    if !cli.quiet {
        eprintln!("{} Host configured", style("✓").green());
    }
    Ok(bl)
}
