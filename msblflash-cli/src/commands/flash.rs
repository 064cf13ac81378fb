//! Flash and key loading command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use msblflash::image::msbl::DEFAULT_TARGET;
use msblflash::{DownloadOptions, KeyMaterial, MsblImage, Progress};
use std::io::{self, BufRead as _};
use std::path::Path;

use super::open_session;
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Resolved `flash` arguments.
pub(crate) struct FlashArgs<'a> {
    pub firmware: &'a Path,
    pub key: Option<&'a Path>,
    pub mass_flash: bool,
    pub reset: bool,
    pub send_size: Option<u16>,
    pub target: Option<&'a str>,
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".into()).into())
    } else {
        Ok(())
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, args: &FlashArgs<'_>) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            args.firmware.display()
        );
    }

    // File problems surface before the port opens. CRCs are checked by the
    // bootloader itself.
    let image = MsblImage::load(args.firmware, args.target.unwrap_or(DEFAULT_TARGET))
        .with_context(|| format!("Failed to load firmware {}", args.firmware.display()))?;

    let key = args
        .key
        .map(|path| {
            KeyMaterial::from_file(path)
                .with_context(|| format!("Failed to load key file {}", path.display()))
        })
        .transpose()?;

    let options = DownloadOptions {
        reset: args.reset,
        partial_size: args.send_size,
    };
    options.validate()?;

    if !cli.quiet {
        eprintln!(
            "{} {} page(s) for {}{}",
            style("ℹ").blue(),
            image.num_pages(),
            image
                .header
                .target_name(),
            if image
                .header
                .is_encrypted()
            {
                format!(" ({})", image.header.enc_type_name())
            } else {
                String::new()
            }
        );
    }

    let mut bl = open_session(cli, config)?;

    if let Some(key) = &key {
        bl.load_key(key)
            .context("Failed to load AES key")?;
        if !cli.quiet {
            eprintln!("{} AES key loaded", style("✓").green());
        }
    }
    ensure_not_interrupted()?;

    let pb = progress_bar(cli, u64::from(image.num_pages()));
    let on_progress = |event: Progress| match event {
        Progress::PageSent { page, .. } => {
            pb.set_message("downloading");
            pb.set_position(page as u64 + 1);
        },
        Progress::PageFlashed { page, status, .. } => {
            pb.set_message(if status == 0 {
                "programming"
            } else {
                "page failed"
            });
            pb.set_position(page as u64 + 1);
        },
    };

    if args.mass_flash {
        let mut target = 0usize;
        let confirm = || {
            pb.finish_and_clear();
            if was_interrupted() {
                return false;
            }
            target += 1;
            let go = prompt_next_target(target);
            if go {
                pb.reset();
            }
            go
        };

        let flashed = bl
            .flash_ram_staged(&image, &options, on_progress, confirm)
            .context("Mass flashing failed")?;
        pb.finish_and_clear();
        bl.close()?;

        if !cli.quiet {
            eprintln!(
                "{} Flashed {flashed} target(s)",
                style("✓").green()
            );
        }
        ensure_not_interrupted()?;
    } else {
        bl.flash_single_target(&image, &options, on_progress)
            .context("Flashing failed")?;
        pb.finish_and_clear();
        bl.close()?;

        if !cli.quiet {
            eprintln!(
                "{} Flash complete{}",
                style("✓").green(),
                if args.reset {
                    ", target reset"
                } else {
                    ", application started"
                }
            );
        }
    }

    Ok(())
}

/// Load-key command implementation.
pub(crate) fn cmd_load_key(cli: &Cli, config: &Config, key_path: &Path) -> Result<()> {
    let key = KeyMaterial::from_file(key_path)
        .with_context(|| format!("Failed to load key file {}", key_path.display()))?;

    let mut bl = open_session(cli, config)?;
    bl.load_key(&key)
        .context("Failed to load AES key")?;
    bl.close()?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {}-byte AES key with {}-byte AAD",
            style("✓").green(),
            key.key().len(),
            key.aad().len()
        );
    }
    Ok(())
}

fn progress_bar(cli: &Cli, pages: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(pages);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    }
}

/// Ask whether target number `target` is attached and should be flashed.
fn prompt_next_target(target: usize) -> bool {
    let prompt = format!("Connect target #{target} and flash it?");

    if console::Term::stderr().is_term() && console::Term::stdout().is_term() {
        return match dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
        {
            Ok(answer) => answer,
            Err(err) => {
                debug!("Prompt failed: {err}");
                false
            },
        };
    }

    eprintln!("{prompt} [Enter to continue, EOF to stop]");
    let mut line = String::new();
    match io::stdin()
        .lock()
        .read_line(&mut line)
    {
        Ok(0) => false,
        Ok(_) => true,
        Err(err) => {
            debug!("Reading stdin failed: {err}");
            false
        },
    }
}
