//! Bootloader session.
//!
//! [`Bootloader`] owns the serial link to the host MCU and turns protocol
//! exchanges into the operations a user cares about: configuring the host,
//! entering the target bootloader, writing its persistent configuration,
//! loading an AES key and downloading firmware.
//!
//! ## Session states
//!
//! ```text
//! Connected ──configure_host──> HostConfigured ──bootldr──> InBootloader
//!                                                              │
//!                          ┌───────────────┬───────────────────┤
//!                          v               v                   v
//!                     Configuring       Erasing ──> Flashing  (key)
//!                          │                           │
//!                          └────────> Exiting <────────┘
//!                                        │
//!                                   close()/drop
//!                                        v
//!                                  Disconnected
//! ```
//!
//! Every step checks the device status and the first failure stops the
//! operation. Nothing is rolled back.

pub mod config;
mod download;

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use semver::Version;

use crate::error::{Error, Result};
use crate::image::KeyMaterial;
use crate::port::Port;
use crate::protocol::{CommInterface, Command, CommandResponse, EblMode, LineProtocol, ProtocolConfig};

pub use config::{BL_PARAMS, BlParam, BootConfig, DeviceConfig, Domain, i2c_addr_display};
pub use download::{DownloadOptions, MAX_PARTIAL_SIZE, Progress};

/// Page size every shipped bootloader reports.
pub const EXPECTED_PAGE_SIZE: u32 = 8192;

/// Largest accepted host communication delay factor.
pub const MAX_DELAY_FACTOR: u8 = 50;

/// `silent_mode` attempts before giving up on a device that keeps
/// rejecting it.
pub const MAX_SILENT_MODE_ATTEMPTS: usize = 10;

/// Key carrying the bootloader version in `get_device_info` responses.
const VERSION_KEY: &str = "hub_firm_ver";

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Port released.
    Disconnected,
    /// Port open, host MCU not configured yet.
    Connected,
    /// Host MCU link parameters set.
    HostConfigured,
    /// Target is in bootloader mode.
    InBootloader,
    /// Writing persistent bootloader configuration.
    Configuring,
    /// Application flash is being erased.
    Erasing,
    /// Pages are being transferred.
    Flashing,
    /// Target was told to leave the bootloader.
    Exiting,
}

/// Settle delays applied after commands that trigger slow device work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// After `erase`.
    pub erase_settle: Duration,
    /// After each persistent configuration command.
    pub config_settle: Duration,
    /// After `image_on_ram 1`.
    pub ram_settle: Duration,
    /// Per downloaded page, before `exit`.
    pub exit_per_page: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            erase_settle: Duration::from_millis(600),
            config_settle: Duration::from_millis(600),
            ram_settle: Duration::from_millis(200),
            exit_per_page: Duration::from_millis(30),
        }
    }
}

impl Timing {
    /// No delays at all.
    pub fn none() -> Self {
        Self {
            erase_settle: Duration::ZERO,
            config_settle: Duration::ZERO,
            ram_settle: Duration::ZERO,
            exit_per_page: Duration::ZERO,
        }
    }
}

fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// Host MCU link settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// How the host forces the target into its bootloader.
    pub ebl_mode: EblMode,
    /// Command wait-time multiplier (0..=50).
    pub delay_factor: u8,
    /// Interface between host and target; `None` keeps the host default.
    pub comm_interface: Option<CommInterface>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ebl_mode: EblMode::Timeout,
            delay_factor: 1,
            comm_interface: None,
        }
    }
}

impl HostConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.delay_factor > MAX_DELAY_FACTOR {
            return Err(Error::InvalidConfig(format!(
                "delay factor must be 0..={MAX_DELAY_FACTOR}, got {}",
                self.delay_factor
            )));
        }
        Ok(())
    }
}

/// Session with a host MCU bootloader.
pub struct Bootloader<P: Port> {
    proto: LineProtocol<P>,
    state: SessionState,
    timing: Timing,
    version: Option<Version>,
}

impl<P: Port> Bootloader<P> {
    /// Start a session on an open port.
    pub fn new(port: P) -> Self {
        Self::with_protocol_config(port, ProtocolConfig::default())
    }

    /// Start a session with a custom retry policy.
    pub fn with_protocol_config(port: P, config: ProtocolConfig) -> Self {
        Self {
            proto: LineProtocol::with_config(port, config),
            state: SessionState::Connected,
            timing: Timing::default(),
            version: None,
        }
    }

    /// Replace the settle delays.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bootloader version from the last `get_device_info`.
    pub fn bootloader_version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        self.proto.port()
    }

    /// Send a command and require status 0.
    fn command(&mut self, command: &Command) -> Result<CommandResponse> {
        self.proto
            .send_command(command)?
            .check(command)
    }

    /// Prepare the host MCU link.
    ///
    /// Selects the interface (if given), silences the host echo, then sets
    /// the EBL mode and delay factor.
    pub fn configure_host(&mut self, host: &HostConfig) -> Result<()> {
        host.validate()?;

        if let Some(iface) = host.comm_interface {
            info!("Setting host communication interface to {iface}");
            self.command(&Command::SetCommInterface(iface))?;
        }

        self.disable_echo()?;

        info!(
            "Setting host EBL mode to {:?}, delay factor {}",
            host.ebl_mode, host.delay_factor
        );
        self.command(&Command::SetHostEblMode(host.ebl_mode))?;
        self.command(&Command::SetHostDelayFactor(host.delay_factor))?;

        self.state = SessionState::HostConfigured;
        Ok(())
    }

    fn disable_echo(&mut self) -> Result<()> {
        let command = Command::SilentMode;
        for attempt in 1..=MAX_SILENT_MODE_ATTEMPTS {
            let response = self
                .proto
                .send_command(&command)?;
            if response.is_ok() {
                debug!("Host echo disabled");
                return Ok(());
            }
            if attempt == MAX_SILENT_MODE_ATTEMPTS {
                return response
                    .check(&command)
                    .map(|_| ());
            }
            if crate::is_interrupted_requested() {
                return Err(Error::Cancelled("host configuration interrupted".into()));
            }
            warn!(
                "silent_mode rejected (err={}), retrying {attempt}/{MAX_SILENT_MODE_ATTEMPTS}",
                response.status()
            );
        }
        Ok(())
    }

    /// Put the target into bootloader mode.
    pub fn enter_bootloader(&mut self) -> Result<()> {
        info!("Entering bootloader...");
        // Host chatter left over from configuration must not be taken as
        // the bootldr answer.
        self.proto
            .port_mut()
            .clear_buffers()?;
        self.command(&Command::EnterBootloader)?;
        self.state = SessionState::InBootloader;
        Ok(())
    }

    /// Query device information and remember the bootloader version.
    pub fn device_info(&mut self) -> Result<CommandResponse> {
        let response = self.command(&Command::GetDeviceInfo)?;
        for (key, value) in response.fields() {
            debug!("device info: {key} = {value}");
        }
        self.version = response
            .get(VERSION_KEY)
            .and_then(config::parse_version);
        if let Some(version) = &self.version {
            info!("Bootloader version {version}");
        }
        Ok(response)
    }

    /// Flash page size reported by the target.
    pub fn page_size(&mut self) -> Result<u32> {
        let command = Command::PageSize;
        let response = self.command(&command)?;
        response
            .get("value")
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| Error::Device {
                command: command.name(),
                status: response.status(),
            })
    }

    /// Unique serial number of the target.
    pub fn usn(&mut self) -> Result<String> {
        let response = self.command(&Command::GetUsn)?;
        Ok(response
            .get("value")
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Write the persistent configuration and save it.
    ///
    /// Enters the bootloader and reads its version first, since the I2C
    /// address encoding depends on it. Without a configuration only the
    /// version is read. Returns the bootloader version, if reported.
    pub fn configure_device(&mut self, boot_config: Option<&BootConfig>) -> Result<Option<Version>> {
        self.enter_bootloader()?;

        match self.device_info() {
            Ok(_) => {},
            Err(Error::Device { status, .. }) => {
                warn!("Unable to read bootloader version (err={status})");
                self.version = None;
            },
            Err(e) => return Err(e),
        }

        let Some(boot_config) = boot_config else {
            return Ok(self.version.clone());
        };

        let version = self.version.clone();
        if version.is_none() {
            warn!("Bootloader version unknown, using legacy I2C address encoding");
        }
        boot_config.validate(version.as_ref())?;

        self.state = SessionState::Configuring;
        info!("Writing bootloader configuration");
        for (param, value) in boot_config.entries() {
            self.command(&Command::SetBlConfig {
                key: param.command,
                value: param.command_arg(value),
            })?;
            info!("  {}: {}", param.label, param.describe(value, version.as_ref()));
            settle(self.timing.config_settle);
        }

        self.command(&Command::SaveBlConfig)?;
        info!("Bootloader configuration saved");
        settle(self.timing.config_settle);

        self.state = SessionState::InBootloader;
        Ok(version)
    }

    /// Read the persistent configuration back from the device.
    pub fn read_device_config(&mut self) -> Result<DeviceConfig> {
        let response = self.command(&Command::GetBlConfig)?;
        settle(self.timing.config_settle);
        DeviceConfig::from_response(&response, self.version.clone())
    }

    /// Stage an AES key and AAD on the device.
    pub fn load_key(&mut self, key: &KeyMaterial) -> Result<()> {
        self.enter_bootloader()?;
        info!("Loading {}-byte AES key", key.key().len());
        self.command(&Command::SetKey(key.encode()))?;
        info!("Key loaded");
        Ok(())
    }

    /// Leave the bootloader and start the application.
    ///
    /// Waits for the flash commit of `num_pages` pages first.
    pub fn exit_from_bootloader(&mut self, num_pages: u16) -> Result<()> {
        settle(self.timing.exit_per_page * u32::from(num_pages));
        info!("Jumping to application");
        self.state = SessionState::Exiting;
        self.command(&Command::Exit)?;
        Ok(())
    }

    /// Reset the target.
    pub fn restart_device(&mut self) -> Result<()> {
        info!("Resetting target");
        self.state = SessionState::Exiting;
        self.command(&Command::Reset)?;
        Ok(())
    }

    /// Reset or exit after a successful download.
    fn finish(&mut self, reset: bool, num_pages: u16) -> Result<()> {
        if reset {
            self.restart_device()
        } else {
            self.exit_from_bootloader(num_pages)
        }
    }

    /// Release the port. Closing twice is not an error.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        debug!("Closing {}", self.proto.port().name());
        self.state = SessionState::Disconnected;
        self.proto
            .port_mut()
            .close()
    }
}

impl<P: Port> Drop for Bootloader<P> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Error closing port: {e}");
        }
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Bootloader, Result, info};
    use crate::port::{NativePort, SerialConfig};

    impl Bootloader<NativePort> {
        /// Open a serial port and start a session on it.
        pub fn open(config: &SerialConfig) -> Result<Self> {
            let port = NativePort::open(config)?;
            info!("Opened {} at {} baud", config.port_name, config.baud_rate);
            Ok(Self::new(port))
        }
    }
}
