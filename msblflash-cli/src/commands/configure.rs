//! Bootloader configuration command implementation.

use anyhow::{Context, Result};
use console::style;
use msblflash::BootConfig;
use std::fs;
use std::path::Path;

use super::open_session;
use crate::Cli;
use crate::config::Config;

/// Configure command implementation.
///
/// Writes `boot_config` (if given), reads the stored configuration back and
/// finally starts the application or resets the target.
pub(crate) fn cmd_configure(
    cli: &Cli,
    config: &Config,
    boot_config: Option<&Path>,
    reset: bool,
    save: Option<&Path>,
) -> Result<()> {
    let boot_config = boot_config
        .map(|path| {
            BootConfig::from_file(path)
                .with_context(|| format!("Failed to load boot config {}", path.display()))
        })
        .transpose()?;

    let mut bl = open_session(cli, config)?;

    let version = bl
        .configure_device(boot_config.as_ref())
        .context("Failed to configure bootloader")?;
    if !cli.quiet {
        match &version {
            Some(v) => eprintln!("{} Bootloader version {v}", style("ℹ").blue()),
            None => eprintln!("{} Bootloader version unknown", style("⚠").yellow()),
        }
        if boot_config.is_some() {
            eprintln!("{} Configuration saved", style("✓").green());
        }
    }

    let device_config = bl
        .read_device_config()
        .context("Failed to read bootloader configuration")?;

    eprintln!(
        "\n{}",
        style("Bootloader configuration")
            .bold()
            .underlined()
    );
    for (label, value) in device_config.describe() {
        eprintln!("  {:<26} {}", format!("{label}:"), style(value).cyan());
    }

    if let Some(path) = save {
        let text = device_config
            .to_boot_config()
            .to_toml()?;
        fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!(
                "{} Configuration written to {}",
                style("✓").green(),
                path.display()
            );
        }
    }

    if reset {
        bl.restart_device()?;
    } else {
        bl.exit_from_bootloader(0)?;
    }
    bl.close()?;

    Ok(())
}
