//! Transport abstraction for the bootloader link.
//!
//! The protocol layer only needs a blocking duplex byte stream with a read
//! timeout, so everything above this module is written against the [`Port`]
//! trait:
//!
//! ```text
//! +----------------------+
//! |  Bootloader session  |
//! +----------+-----------+
//!            |
//! +----------v-----------+
//! | Line protocol engine |
//! +----------+-----------+
//!            |
//! +----------v-----------+
//! |      Port trait      |
//! +----------+-----------+
//!            |
//! +----------v-----------+
//! |  NativePort (serial) |
//! +----------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the host MCU bootloader link.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default read timeout.
///
/// Flash erase and page commits can keep the device silent for a long
/// time, so the link uses one generous timeout instead of per-command
/// values.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-stream transport used by the bootloader session.
///
/// Reads are expected to block until data arrives or the configured timeout
/// expires, in which case they fail with [`std::io::ErrorKind::TimedOut`].
pub trait Port: Read + Write + Send {
    /// Discard any buffered input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method the port cannot be used for further I/O.
    /// Closing twice is not an error.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
