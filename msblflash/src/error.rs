//! Error types for msblflash.

use std::io;
use thiserror::Error;

/// Result type for msblflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Status code reported for exchanges that failed at the transport layer.
pub const STATUS_TRANSPORT_FAILURE: i32 = -1;

/// Error type for msblflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The host MCU serial port could not be opened or driven.
    #[cfg(feature = "native")]
    #[error("Host port {port}: {source}")]
    HostPort {
        /// Port name/path.
        port: String,
        /// Underlying serial error.
        #[source]
        source: serialport::Error,
    },

    /// Invalid MSBL container or raw image.
    #[error("Invalid MSBL: {0}")]
    InvalidMsbl(String),

    /// CRC32 mismatch.
    #[error("CRC mismatch in {what}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Which checksum failed.
        what: String,
        /// Stored CRC value.
        expected: u32,
        /// Recomputed CRC value.
        actual: u32,
    },

    /// Invalid AES key file.
    #[error("Invalid key file: {0}")]
    InvalidKeyFile(String),

    /// Invalid bootloader or host configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No valid response line arrived within the retry budget.
    #[error("Protocol timeout: {0}")]
    ProtocolTimeout(String),

    /// The device answered with a nonzero status.
    #[error("Device rejected `{command}` (err={status})")]
    Device {
        /// Command name as sent on the wire.
        command: String,
        /// Status code from the `err` field.
        status: i32,
    },

    /// The operation was cancelled by the user.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Protocol status code associated with this error.
    ///
    /// Device errors carry the status reported by the bootloader; failures
    /// below the protocol layer map to [`STATUS_TRANSPORT_FAILURE`].
    pub fn status(&self) -> Option<i32> {
        match self {
            Self::Device { status, .. } => Some(*status),
            Self::Io(_) | Self::ProtocolTimeout(_) => Some(STATUS_TRANSPORT_FAILURE),
            #[cfg(feature = "native")]
            Self::HostPort { .. } => Some(STATUS_TRANSPORT_FAILURE),
            _ => None,
        }
    }

    /// Whether the error is a format problem detected before talking to
    /// the device.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMsbl(_)
                | Self::CrcMismatch { .. }
                | Self::InvalidKeyFile(_)
                | Self::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_status() {
        let err = Error::Device {
            command: "erase".into(),
            status: 3,
        };
        assert_eq!(err.status(), Some(3));
        assert_eq!(err.to_string(), "Device rejected `erase` (err=3)");
    }

    #[test]
    fn test_transport_error_maps_to_minus_one() {
        let err = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(err.status(), Some(STATUS_TRANSPORT_FAILURE));
        assert!(!err.is_format_error());
    }

    #[test]
    fn test_format_errors() {
        assert!(Error::InvalidMsbl("x".into()).is_format_error());
        assert!(Error::InvalidKeyFile("x".into()).is_format_error());
        assert!(Error::InvalidConfig("x".into()).is_format_error());
        assert_eq!(Error::Cancelled("x".into()).status(), None);
    }
}
