//! Firmware info and pack command implementations.

use {
    anyhow::{Context, Result},
    console::style,
    msblflash::{AppHeader, MsblImage, image::msbl::DEFAULT_TARGET},
    std::path::{Path, PathBuf},
};

use crate::Cli;

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool, target: Option<&str>) -> Result<()> {
    let image = load_image(firmware, target)?;
    if json {
        return cmd_info_json(&image);
    }

    let header = &image.header;
    eprintln!(
        "\n{}",
        style("MSBL image")
            .bold()
            .underlined()
    );
    eprintln!("  Target:      {}", header.target_name());
    eprintln!("  Format:      {}", header.format_version);
    eprintln!(
        "  Encryption:  {}",
        if header.is_encrypted() {
            header.enc_type_name()
        } else {
            "none".into()
        }
    );
    eprintln!("  Pages:       {}", image.num_pages());
    eprintln!("  Page size:   {} bytes", header.page_size);
    eprintln!("  IV:          {}", hex::encode(header.nonce));
    eprintln!("  Auth:        {}", hex::encode(header.auth));

    match image.trailing_crc() {
        Some(crc) => eprintln!(
            "  Image CRC:   {crc:08X} ({})",
            status_text(image.verify_trailing_crc().is_ok())
        ),
        None => eprintln!("  Image CRC:   {}", style("none (raw binary)").dim()),
    }
    eprintln!(
        "  Page CRCs:   {}",
        status_text(
            image
                .verify_page_crcs()
                .is_ok()
        )
    );

    if let Some(app) = app_header(&image) {
        eprintln!(
            "\n{}",
            style("Application (as packed by msblflash pack)")
                .bold()
                .underlined()
        );
        eprintln!("  Length:      {} bytes", app.length);
        eprintln!("  CRC32:       {:08X}", app.crc32);
    }

    Ok(())
}

/// Info command `--json` output: structured JSON to stdout.
fn cmd_info_json(image: &MsblImage) -> Result<()> {
    let header = &image.header;
    let app = app_header(image).map(|app| {
        serde_json::json!({
            "length": app.length,
            "crc32": format!("0x{:08X}", app.crc32),
        })
    });

    let output = serde_json::json!({
        "ok": true,
        "data": {
            "target": header.target_name(),
            "format_version": header.format_version,
            "encrypted": header.is_encrypted(),
            "enc_type": header.enc_type_name(),
            "num_pages": image.num_pages(),
            "page_size": header.page_size,
            "iv": hex::encode(header.nonce),
            "auth": hex::encode(header.auth),
            "image_crc": image.trailing_crc().map(|crc| format!("0x{crc:08X}")),
            "image_crc_valid": image.verify_trailing_crc().is_ok(),
            "page_crcs_valid": image.verify_page_crcs().is_ok(),
            "app": app,
        }
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output)?
    );
    Ok(())
}

/// Pack command implementation.
pub(crate) fn cmd_pack(
    cli: &Cli,
    bin: &Path,
    output: Option<&Path>,
    target: Option<&str>,
) -> Result<()> {
    let data = std::fs::read(bin).with_context(|| format!("Failed to read {}", bin.display()))?;
    let image = MsblImage::from_raw(&data, target.unwrap_or(DEFAULT_TARGET))
        .with_context(|| format!("Failed to wrap {}", bin.display()))?;

    let output = output.map_or_else(|| bin.with_extension("msbl"), PathBuf::from);
    image
        .write_file(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} ({} pages for {})",
            style("✓").green(),
            output.display(),
            image.num_pages(),
            image
                .header
                .target_name()
        );
    }
    Ok(())
}

fn load_image(firmware: &Path, target: Option<&str>) -> Result<MsblImage> {
    MsblImage::load(firmware, target.unwrap_or(DEFAULT_TARGET))
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))
}

/// Size/CRC record that `pack` leaves at the start of the last page.
///
/// Other tools put application bytes there, so the record is only trusted
/// when its length ends inside the last page.
fn app_header(image: &MsblImage) -> Option<AppHeader> {
    if image
        .header
        .is_encrypted()
    {
        return None;
    }
    let app = AppHeader::from_bytes(
        image
            .pages()
            .last()?
            .payload(),
    )
    .ok()?;

    let page_size = u64::from(image.header.page_size);
    let pages = u64::from(image.num_pages());
    let length = u64::from(app.length);
    (length > pages.saturating_sub(1) * page_size && length <= pages * page_size).then_some(app)
}

fn status_text(ok: bool) -> console::StyledObject<&'static str> {
    if ok {
        style("valid").green()
    } else {
        style("INVALID").red()
    }
}
