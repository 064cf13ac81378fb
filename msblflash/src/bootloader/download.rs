//! Firmware download strategies.
//!
//! Single-target flashing streams every page straight into the target's
//! flash. RAM-staged (mass) flashing downloads the image once into the host
//! MCU's RAM and then programs any number of targets from there.

use log::{info, warn};

use super::{Bootloader, EXPECTED_PAGE_SIZE, SessionState, settle};
use crate::error::{Error, Result};
use crate::image::{MsblImage, Page};
use crate::port::Port;
use crate::protocol::Command;

/// Largest partial send size (one full page with its trailer).
pub const MAX_PARTIAL_SIZE: u16 = 8208;

/// Download options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Reset the target afterwards instead of jumping to the application.
    pub reset: bool,
    /// Have the host forward pages to the target in chunks of this size.
    pub partial_size: Option<u16>,
}

impl DownloadOptions {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        match self.partial_size {
            Some(size) if size == 0 || size > MAX_PARTIAL_SIZE => Err(Error::InvalidConfig(
                format!("send size must be 1..={MAX_PARTIAL_SIZE}, got {size}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Download progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Page `page` (0-based) of `total` was accepted by the host.
    PageSent {
        /// Page index.
        page: usize,
        /// Page count.
        total: usize,
    },
    /// The host reported programming page `page` from RAM.
    PageFlashed {
        /// Page index.
        page: usize,
        /// Page count.
        total: usize,
        /// Device status (0 = done).
        status: i32,
    },
}

impl<P: Port> Bootloader<P> {
    /// Flash one target directly.
    ///
    /// On any failure nothing after the failing step is sent: no further
    /// pages and no exit or reset.
    pub fn flash_single_target<F>(
        &mut self,
        image: &MsblImage,
        options: &DownloadOptions,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(Progress),
    {
        options.validate()?;
        info!("Flashing {} pages to target", image.num_pages());

        self.enter_bootloader()?;
        self.command(&Command::ImageOnRam(false))?;

        match self.device_info() {
            Ok(_) => {},
            Err(Error::Device { status, .. }) => warn!("Reading device info failed (err={status})"),
            Err(e) => return Err(e),
        }

        let page_size = self.page_size()?;
        if page_size != EXPECTED_PAGE_SIZE {
            warn!("Target page size is {page_size}, expected {EXPECTED_PAGE_SIZE}");
        }
        let usn = self.usn()?;
        info!("Target USN: {usn}");

        self.send_image_params(image, options)?;

        self.state = SessionState::Erasing;
        info!("Erasing application flash...");
        self.command(&Command::Erase)?;
        settle(self.timing.erase_settle);

        self.command(&Command::Flash)?;
        self.state = SessionState::Flashing;
        self.download_pages(image, &mut progress)?;
        info!("All pages flashed");

        self.finish(options.reset, image.num_pages())
    }

    /// Stage the image in host RAM and flash targets until `confirm` says
    /// stop.
    ///
    /// `confirm` is asked before each target; returning `false` (or an
    /// interrupt request) ends the loop normally. Returns how many targets
    /// were flashed.
    pub fn flash_ram_staged<F, C>(
        &mut self,
        image: &MsblImage,
        options: &DownloadOptions,
        mut progress: F,
        mut confirm: C,
    ) -> Result<usize>
    where
        F: FnMut(Progress),
        C: FnMut() -> bool,
    {
        options.validate()?;
        info!("Staging {} pages in host RAM", image.num_pages());

        self.command(&Command::ImageOnRam(true))?;
        settle(self.timing.ram_settle);

        self.send_image_params(image, options)?;
        self.command(&Command::Flash)?;
        self.state = SessionState::Flashing;
        self.download_pages(image, &mut progress)?;
        info!("Image staged in host RAM");

        let mut flashed = 0;
        loop {
            if !confirm() || crate::is_interrupted_requested() {
                info!("Mass flashing stopped after {flashed} target(s)");
                return Ok(flashed);
            }

            self.flash_from_ram(image.num_pages(), &mut progress)?;
            flashed += 1;
            info!("Target {flashed} flashed");

            self.finish(options.reset, image.num_pages())?;
        }
    }

    fn send_image_params(&mut self, image: &MsblImage, options: &DownloadOptions) -> Result<()> {
        self.command(&Command::NumPages(image.num_pages()))?;
        self.command(&Command::SetIv(image.header.nonce))?;
        self.command(&Command::SetAuth(image.header.auth))?;
        if let Some(size) = options.partial_size {
            info!("Partial page send size {size}");
            self.command(&Command::SetPartialSize(size))?;
        }
        Ok(())
    }

    fn download_pages<F>(&mut self, image: &MsblImage, progress: &mut F) -> Result<()>
    where
        F: FnMut(Progress),
    {
        let total = image.pages().len();
        for (page, data) in image
            .pages()
            .iter()
            .enumerate()
        {
            self.download_page(page, data)?;
            progress(Progress::PageSent { page, total });
        }
        Ok(())
    }

    fn download_page(&mut self, index: usize, page: &Page) -> Result<()> {
        let context = format!("page {}", index + 1);
        self.proto
            .write_raw(page.as_bytes())?;
        let response = self
            .proto
            .read_response(&context)?;
        if !response.is_ok() {
            warn!("Flashing {context} failed (err={})", response.status());
            return Err(Error::Device {
                command: context,
                status: response.status(),
            });
        }
        Ok(())
    }

    /// Program the target from the RAM copy, one status line per page.
    fn flash_from_ram<F>(&mut self, num_pages: u16, progress: &mut F) -> Result<()>
    where
        F: FnMut(Progress),
    {
        info!("Flashing image from host RAM to target");
        self.command(&Command::ImageFlash)?;

        let total = usize::from(num_pages);
        let mut failed = None;
        for page in 0..total {
            let response = self
                .proto
                .read_response(&format!("image_flash page {}", page + 1))?;
            let status = response.status();
            progress(Progress::PageFlashed {
                page,
                total,
                status,
            });
            if status != 0 {
                warn!("Page {}/{total} FAILED (err={status})", page + 1);
                failed.get_or_insert(status);
            }
        }

        match failed {
            Some(status) => Err(Error::Device {
                command: Command::ImageFlash.name(),
                status,
            }),
            None => Ok(()),
        }
    }
}
