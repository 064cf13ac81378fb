//! # msblflash
//!
//! A library for updating firmware on Maxim microcontrollers through a
//! host MCU running the MSBL bootloader protocol.
//!
//! This crate provides:
//!
//! - MSBL container parsing, synthesis from raw binaries and serialization
//! - AES key file parsing for encrypted images
//! - The line-oriented command/response protocol over a serial link
//! - A bootloader session with single-target and RAM-staged (mass) flashing
//!   and persistent bootloader configuration
//!
//! ## Supported Devices
//!
//! - MAX32660, MAX32670, MAX78000 behind a host MCU bootloader
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use msblflash::{Bootloader, DownloadOptions, HostConfig, MsblImage, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = MsblImage::load("app.msbl", "MAX78000")?;
//!
//!     let mut bl = Bootloader::open(&SerialConfig::new("/dev/ttyACM0", 115_200))?;
//!     bl.configure_host(&HostConfig::default())?;
//!     bl.flash_single_target(&image, &DownloadOptions::default(), |progress| {
//!         println!("{progress:?}");
//!     })?;
//!     bl.close()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod bootloader;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

/// Serializes tests that touch the process-wide interrupt flag.
#[cfg(test)]
pub(crate) fn interrupt_test_guard() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, PoisonError};

    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock()
        .unwrap_or_else(PoisonError::into_inner)
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    bootloader::{
        BootConfig, Bootloader, DeviceConfig, DownloadOptions, HostConfig, Progress, SessionState,
        Timing, i2c_addr_display,
    },
    error::{Error, Result},
    image::{AppHeader, KeyMaterial, MsblHeader, MsblImage, Page},
    port::{Port, SerialConfig},
    protocol::{CommInterface, CommandResponse, EblMode, ProtocolConfig},
};
