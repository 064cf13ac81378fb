//! Text commands understood by the MSBL host bootloader.
//!
//! Every command is a single ASCII line. [`Command`] renders the exact wire
//! text (without the trailing newline, which the line engine appends).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Length of the image nonce (IV) in bytes.
pub const NONCE_LEN: usize = 11;

/// Length of the image authentication tag in bytes.
pub const AUTH_LEN: usize = 16;

/// Communication interface between host MCU and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommInterface {
    /// UART.
    Uart,
    /// I2C.
    I2c,
    /// SPI.
    Spi,
}

impl CommInterface {
    /// Protocol name of the interface.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uart => "uart",
            Self::I2c => "i2c",
            Self::Spi => "spi",
        }
    }
}

impl fmt::Display for CommInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommInterface {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "uart" => Ok(Self::Uart),
            "i2c" => Ok(Self::I2c),
            "spi" => Ok(Self::Spi),
            other => Err(Error::InvalidConfig(format!(
                "unknown communication interface '{other}' (expected uart, i2c or spi)"
            ))),
        }
    }
}

/// How the host puts the target into bootloader mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EblMode {
    /// Catch the bootloader during its startup timeout.
    #[default]
    Timeout = 0,
    /// Hold the EBL GPIO pin while resetting the target.
    Gpio = 1,
}

impl TryFrom<u8> for EblMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Timeout),
            1 => Ok(Self::Gpio),
            v => Err(Error::InvalidConfig(format!(
                "EBL mode must be 0 (timeout) or 1 (GPIO), got {v}"
            ))),
        }
    }
}

/// A bootloader command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `bootldr`
    EnterBootloader,
    /// `silent_mode 1`
    SilentMode,
    /// `set_cfg comm <iface>`
    SetCommInterface(CommInterface),
    /// `set_cfg host ebl <mode>`
    SetHostEblMode(EblMode),
    /// `set_cfg host cdf <factor>`
    SetHostDelayFactor(u8),
    /// `set_cfg bl <key> <value>`
    SetBlConfig {
        /// Sub-command name, e.g. `enter_pol`.
        key: &'static str,
        /// Already formatted argument list.
        value: String,
    },
    /// `set_cfg bl save`
    SaveBlConfig,
    /// `get_cfg bl`
    GetBlConfig,
    /// `get_device_info`
    GetDeviceInfo,
    /// `page_size`
    PageSize,
    /// `get_usn`
    GetUsn,
    /// `num_pages <n>`
    NumPages(u16),
    /// `set_iv <22 hex digits>`
    SetIv([u8; NONCE_LEN]),
    /// `set_auth <32 hex digits>`
    SetAuth([u8; AUTH_LEN]),
    /// `set_partial_size <n>`
    SetPartialSize(u16),
    /// `erase`
    Erase,
    /// `flash`
    Flash,
    /// `image_on_ram <0|1>`
    ImageOnRam(bool),
    /// `image_flash`
    ImageFlash,
    /// `set_key <hex blob>`
    SetKey(String),
    /// `reset`
    Reset,
    /// `exit`
    Exit,
}

impl Command {
    /// Short command name used in logs and error messages.
    pub fn name(&self) -> String {
        match self {
            Self::EnterBootloader => "bootldr".into(),
            Self::SilentMode => "silent_mode".into(),
            Self::SetCommInterface(_) => "set_cfg comm".into(),
            Self::SetHostEblMode(_) => "set_cfg host ebl".into(),
            Self::SetHostDelayFactor(_) => "set_cfg host cdf".into(),
            Self::SetBlConfig { key, .. } => format!("set_cfg bl {key}"),
            Self::SaveBlConfig => "set_cfg bl save".into(),
            Self::GetBlConfig => "get_cfg bl".into(),
            Self::GetDeviceInfo => "get_device_info".into(),
            Self::PageSize => "page_size".into(),
            Self::GetUsn => "get_usn".into(),
            Self::NumPages(_) => "num_pages".into(),
            Self::SetIv(_) => "set_iv".into(),
            Self::SetAuth(_) => "set_auth".into(),
            Self::SetPartialSize(_) => "set_partial_size".into(),
            Self::Erase => "erase".into(),
            Self::Flash => "flash".into(),
            Self::ImageOnRam(_) => "image_on_ram".into(),
            Self::ImageFlash => "image_flash".into(),
            Self::SetKey(_) => "set_key".into(),
            Self::Reset => "reset".into(),
            Self::Exit => "exit".into(),
        }
    }

    /// Wire text including the terminating newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetCommInterface(iface) => write!(f, "set_cfg comm {iface}"),
            Self::SetHostEblMode(mode) => write!(f, "set_cfg host ebl {}", *mode as u8),
            Self::SetHostDelayFactor(factor) => write!(f, "set_cfg host cdf {factor}"),
            Self::SetBlConfig { key, value } => write!(f, "set_cfg bl {key} {value}"),
            Self::NumPages(n) => write!(f, "num_pages {n}"),
            Self::SetIv(nonce) => write!(f, "set_iv {}", hex::encode_upper(nonce)),
            Self::SetAuth(auth) => write!(f, "set_auth {}", hex::encode_upper(auth)),
            Self::SetPartialSize(n) => write!(f, "set_partial_size {n}"),
            Self::ImageOnRam(enable) => write!(f, "image_on_ram {}", u8::from(*enable)),
            Self::SetKey(blob) => write!(f, "set_key {blob}"),
            Self::SilentMode => f.write_str("silent_mode 1"),
            other => f.write_str(&other.name()),
        }
    }
}
