//! Persistent bootloader configuration.
//!
//! The bootloader stores twelve parameters in flash. Each one is known by
//! three names: the `set_cfg bl` sub-command that writes it, the key in a
//! `[BootConfig]` configuration file, and the key reported back by
//! `get_cfg bl`. [`BL_PARAMS`] lists them in the order they are written.
//!
//! ```text
//! [BootConfig]
//! enter_bl_check = 1
//! ebl_pin = 7
//! ebl_pol = 0
//! valid_mark_check = 1
//! uart_enable = 1
//! i2c_enable = 1
//! spi_enable = 0
//! i2c_addr = 0
//! crc_check = 1
//! swd_lock = 0
//! ebl_timeout = 10
//! exit_bl_mode = 1
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::CommandResponse;

/// First bootloader version that takes a raw 7-bit I2C address instead of
/// an index into [`LEGACY_I2C_ADDRESSES`].
pub const I2C_ADDR_VERSION: Version = Version::new(3, 4, 2);

/// I2C addresses selectable on bootloaders older than [`I2C_ADDR_VERSION`].
pub const LEGACY_I2C_ADDRESSES: [u8; 4] = [0x58, 0x5A, 0x5C, 0xAA];

/// Value domain of a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// 0 disabled, 1 enabled.
    EnableDisable,
    /// 0 active low, 1 active high.
    Polarity,
    /// 0 ignore the EBL pin, 1 check it.
    EntryCheck,
    /// Inclusive integer range.
    Range(u32, u32),
    /// How the bootloader leaves after reset.
    ExitMode,
    /// I2C address, encoded according to the bootloader version.
    I2cAddress,
}

impl Domain {
    /// Inclusive upper bound for `version`.
    fn max(self, version: Option<&Version>) -> u32 {
        match self {
            Self::EnableDisable | Self::Polarity | Self::EntryCheck => 1,
            Self::Range(_, hi) => hi,
            Self::ExitMode => 2,
            Self::I2cAddress if is_legacy(version) => 3,
            Self::I2cAddress => 255,
        }
    }

    fn min(self) -> u32 {
        match self {
            Self::Range(lo, _) => lo,
            _ => 0,
        }
    }
}

/// One persistent bootloader parameter.
#[derive(Debug, Clone, Copy)]
pub struct BlParam {
    /// `set_cfg bl` sub-command.
    pub command: &'static str,
    /// Key in the `[BootConfig]` section.
    pub config_key: &'static str,
    /// Key in the `get_cfg bl` response.
    pub readback_key: &'static str,
    /// Legal values.
    pub domain: Domain,
    /// Human readable name.
    pub label: &'static str,
    /// Field holding the value in a [`BootConfig`].
    pub value: fn(&BootConfig) -> u32,
    /// Mutable access to the same field.
    pub slot: fn(&mut BootConfig) -> &mut u32,
}

/// All parameters, in write order.
pub static BL_PARAMS: [BlParam; 12] = [
    BlParam {
        command: "enter_mode",
        config_key: "enter_bl_check",
        readback_key: "enter_bl_check",
        domain: Domain::EntryCheck,
        label: "Enter BL check",
        value: |c| c.enter_bl_check,
        slot: |c| &mut c.enter_bl_check,
    },
    BlParam {
        command: "enter_pin",
        config_key: "ebl_pin",
        readback_key: "ebl_pin",
        domain: Domain::Range(0, 31),
        label: "EBL pin",
        value: |c| c.ebl_pin,
        slot: |c| &mut c.ebl_pin,
    },
    BlParam {
        command: "enter_pol",
        config_key: "ebl_pol",
        readback_key: "ebl_polarity",
        domain: Domain::Polarity,
        label: "EBL polarity",
        value: |c| c.ebl_pol,
        slot: |c| &mut c.ebl_pol,
    },
    BlParam {
        command: "valid",
        config_key: "valid_mark_check",
        readback_key: "valid_mark_check",
        domain: Domain::EnableDisable,
        label: "Valid mark check",
        value: |c| c.valid_mark_check,
        slot: |c| &mut c.valid_mark_check,
    },
    BlParam {
        command: "uart",
        config_key: "uart_enable",
        readback_key: "uart_enable",
        domain: Domain::EnableDisable,
        label: "UART interface",
        value: |c| c.uart_enable,
        slot: |c| &mut c.uart_enable,
    },
    BlParam {
        command: "i2c",
        config_key: "i2c_enable",
        readback_key: "i2c_enable",
        domain: Domain::EnableDisable,
        label: "I2C interface",
        value: |c| c.i2c_enable,
        slot: |c| &mut c.i2c_enable,
    },
    BlParam {
        command: "spi",
        config_key: "spi_enable",
        readback_key: "spi_enable",
        domain: Domain::EnableDisable,
        label: "SPI interface",
        value: |c| c.spi_enable,
        slot: |c| &mut c.spi_enable,
    },
    BlParam {
        command: "addr_i2c",
        config_key: "i2c_addr",
        readback_key: "i2c_addr",
        domain: Domain::I2cAddress,
        label: "I2C address",
        value: |c| c.i2c_addr,
        slot: |c| &mut c.i2c_addr,
    },
    BlParam {
        command: "crc",
        config_key: "crc_check",
        readback_key: "crc_check",
        domain: Domain::EnableDisable,
        label: "CRC check",
        value: |c| c.crc_check,
        slot: |c| &mut c.crc_check,
    },
    BlParam {
        command: "swd_lock",
        config_key: "swd_lock",
        readback_key: "swd_lock",
        domain: Domain::EnableDisable,
        label: "SWD lock",
        value: |c| c.swd_lock,
        slot: |c| &mut c.swd_lock,
    },
    BlParam {
        command: "exit_to",
        config_key: "ebl_timeout",
        readback_key: "ebl_timeout",
        domain: Domain::Range(0, 255),
        label: "EBL timeout",
        value: |c| c.ebl_timeout,
        slot: |c| &mut c.ebl_timeout,
    },
    BlParam {
        command: "exit_mode",
        config_key: "exit_bl_mode",
        readback_key: "exit_bl_mode",
        domain: Domain::ExitMode,
        label: "Exit BL mode",
        value: |c| c.exit_bl_mode,
        slot: |c| &mut c.exit_bl_mode,
    },
];

impl BlParam {
    /// Find a parameter by its configuration file key.
    pub fn by_config_key(key: &str) -> Option<&'static Self> {
        BL_PARAMS
            .iter()
            .find(|p| p.config_key == key)
    }

    /// Reject values outside the parameter's domain.
    pub fn validate(&self, value: u32, version: Option<&Version>) -> Result<()> {
        let (lo, hi) = (self.domain.min(), self.domain.max(version));
        if (lo..=hi).contains(&value) {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!(
                "{} = {value} is out of range ({lo}..={hi})",
                self.config_key
            )))
        }
    }

    /// Argument list sent after the sub-command.
    pub fn command_arg(&self, value: u32) -> String {
        // The pin is addressed as <port> <pin>; only port 0 is wired.
        if self.command == "enter_pin" {
            format!("0 {value}")
        } else {
            value.to_string()
        }
    }

    /// Render a value for display.
    pub fn describe(&self, value: u32, version: Option<&Version>) -> String {
        let text = match (self.domain, value) {
            (Domain::EnableDisable, 0) => "disabled",
            (Domain::EnableDisable, 1) => "enabled",
            (Domain::Polarity, 0) => "active low",
            (Domain::Polarity, 1) => "active high",
            (Domain::EntryCheck, 0) => "Do not check EBL pin",
            (Domain::EntryCheck, 1) => "Check EBL pin",
            (Domain::ExitMode, 0) => "Jump immediately",
            (Domain::ExitMode, 1) => "Wait for programmable delay",
            (Domain::ExitMode, 2) => "remain in bootloader until receive exit command",
            (Domain::I2cAddress, raw) => return i2c_addr_display(version, raw),
            (_, other) => return other.to_string(),
        };
        text.to_string()
    }
}

/// Whether `version` uses the indexed I2C address encoding.
///
/// An unknown version is treated as legacy.
pub fn is_legacy(version: Option<&Version>) -> bool {
    version.is_none_or(|v| *v < I2C_ADDR_VERSION)
}

/// Display an I2C address as reported by (or written to) a bootloader.
pub fn i2c_addr_display(version: Option<&Version>, raw: u32) -> String {
    if is_legacy(version) {
        if let Some(addr) = usize::try_from(raw)
            .ok()
            .and_then(|i| LEGACY_I2C_ADDRESSES.get(i))
        {
            return format!("{addr:#04X}");
        }
    }
    raw.to_string()
}

/// Parse a bootloader version string such as `3.4.2` or `v3.4`.
///
/// Missing minor/patch components are taken as zero; trailing text after a
/// component is ignored.
pub fn parse_version(text: &str) -> Option<Version> {
    let text = text
        .trim()
        .trim_start_matches(['v', 'V']);
    if let Ok(version) = Version::parse(text) {
        return Some(version);
    }

    let mut parts = [0u64; 3];
    let mut seen = 0;
    for (slot, part) in parts
        .iter_mut()
        .zip(text.split('.'))
    {
        let digits: String = part
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if digits.is_empty() {
            break;
        }
        *slot = digits.parse().ok()?;
        seen += 1;
    }

    (seen > 0).then(|| Version::new(parts[0], parts[1], parts[2]))
}

#[derive(Debug, Deserialize, Serialize)]
struct BootConfigFile {
    #[serde(rename = "BootConfig")]
    boot_config: BootConfig,
}

/// Contents of a `[BootConfig]` configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)]
pub struct BootConfig {
    pub enter_bl_check: u32,
    pub ebl_pin: u32,
    pub ebl_pol: u32,
    pub valid_mark_check: u32,
    pub uart_enable: u32,
    pub i2c_enable: u32,
    pub spi_enable: u32,
    pub i2c_addr: u32,
    pub crc_check: u32,
    pub swd_lock: u32,
    pub ebl_timeout: u32,
    pub exit_bl_mode: u32,
}

impl BootConfig {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading boot config from: {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse and validate configuration text.
    ///
    /// Values are checked against the widest domain; the I2C address is
    /// checked again once the bootloader version is known.
    pub fn parse(text: &str) -> Result<Self> {
        let file: BootConfigFile = toml::from_str(text)
            .map_err(|e| Error::InvalidConfig(format!("bad boot config: {e}")))?;
        let config = file.boot_config;
        config.validate(Some(&I2C_ADDR_VERSION))?;
        Ok(config)
    }

    /// Render as a `[BootConfig]` file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(&BootConfigFile {
            boot_config: self.clone(),
        })
        .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Value of `param`.
    pub fn get(&self, param: &BlParam) -> u32 {
        (param.value)(self)
    }

    /// Parameters and their values in write order.
    pub fn entries(&self) -> impl Iterator<Item = (&'static BlParam, u32)> + '_ {
        BL_PARAMS
            .iter()
            .map(move |p| (p, self.get(p)))
    }

    /// Check every value for a bootloader of `version`.
    pub fn validate(&self, version: Option<&Version>) -> Result<()> {
        for (param, value) in self.entries() {
            param.validate(value, version)?;
        }
        Ok(())
    }
}

/// Configuration reported by `get_cfg bl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    values: BTreeMap<&'static str, u32>,
    version: Option<Version>,
}

impl DeviceConfig {
    /// Decode a `get_cfg bl` response.
    pub fn from_response(response: &CommandResponse, version: Option<Version>) -> Result<Self> {
        let mut values = BTreeMap::new();
        for param in &BL_PARAMS {
            let raw = response
                .get(param.readback_key)
                .ok_or_else(|| {
                    Error::InvalidConfig(format!("readback is missing `{}`", param.readback_key))
                })?;
            let value = raw
                .trim()
                .parse()
                .map_err(|_| {
                    Error::InvalidConfig(format!(
                        "readback `{}` is not an integer: {raw:?}",
                        param.readback_key
                    ))
                })?;
            values.insert(param.config_key, value);
        }
        Ok(Self { values, version })
    }

    /// Raw value by configuration file key.
    pub fn get(&self, config_key: &str) -> Option<u32> {
        self.values
            .get(config_key)
            .copied()
    }

    /// Bootloader version used for display.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// `(label, display value)` pairs in table order.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        BL_PARAMS
            .iter()
            .filter_map(|p| {
                self.get(p.config_key)
                    .map(|v| (p.label, p.describe(v, self.version.as_ref())))
            })
            .collect()
    }

    /// Convert back into a configuration record.
    pub fn to_boot_config(&self) -> BootConfig {
        let mut config = BootConfig::default();
        for param in &BL_PARAMS {
            *(param.slot)(&mut config) = self
                .get(param.config_key)
                .unwrap_or_default();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[BootConfig]
enter_bl_check = 1
ebl_pin = 7
ebl_pol = 0
valid_mark_check = 1
uart_enable = 1
i2c_enable = 1
spi_enable = 0
i2c_addr = 2
crc_check = 1
swd_lock = 0
ebl_timeout = 10
exit_bl_mode = 1
";

    fn readback() -> CommandResponse {
        CommandResponse::parse(
            "get_cfg err=0 enter_bl_check=1 ebl_pin=7 ebl_polarity=1 valid_mark_check=0 \
             uart_enable=1 i2c_enable=0 spi_enable=0 i2c_addr=2 crc_check=1 swd_lock=0 \
             ebl_timeout=5 exit_bl_mode=2\n",
        )
        .unwrap()
    }

    #[test]
    fn test_i2c_addr_display_threshold() {
        let old = Version::new(3, 4, 1);
        let new = Version::new(3, 4, 2);
        assert_eq!(i2c_addr_display(Some(&old), 2), "0x5C");
        assert_eq!(i2c_addr_display(Some(&old), 3), "0xAA");
        assert_eq!(i2c_addr_display(Some(&new), 2), "2");
        assert_eq!(i2c_addr_display(Some(&Version::new(4, 0, 0)), 0x55), "85");
        assert_eq!(i2c_addr_display(None, 0), "0x58");
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3.4.2"), Some(Version::new(3, 4, 2)));
        assert_eq!(parse_version("v3.4"), Some(Version::new(3, 4, 0)));
        assert_eq!(parse_version(" 3.10.1\r"), Some(Version::new(3, 10, 1)));
        assert_eq!(parse_version("3.4.2b"), Some(Version::new(3, 4, 2)));
        assert_eq!(parse_version("unknown"), None);
        assert!(parse_version("3.4.1").unwrap() < I2C_ADDR_VERSION);
    }

    #[test]
    fn test_table_order_and_names() {
        let commands: Vec<_> = BL_PARAMS
            .iter()
            .map(|p| p.command)
            .collect();
        assert_eq!(
            commands,
            [
                "enter_mode",
                "enter_pin",
                "enter_pol",
                "valid",
                "uart",
                "i2c",
                "spi",
                "addr_i2c",
                "crc",
                "swd_lock",
                "exit_to",
                "exit_mode"
            ]
        );
        let pol = BlParam::by_config_key("ebl_pol").unwrap();
        assert_eq!(pol.readback_key, "ebl_polarity");
    }

    #[test]
    fn test_each_param_owns_its_field() {
        let mut config = BootConfig::default();
        for (i, param) in BL_PARAMS
            .iter()
            .enumerate()
        {
            *(param.slot)(&mut config) = i as u32 + 100;
        }
        assert_eq!(config.enter_bl_check, 100);
        assert_eq!(config.ebl_pol, 102);
        assert_eq!(config.i2c_addr, 107);
        assert_eq!(config.exit_bl_mode, 111);

        let text = toml::to_string(&config).unwrap();
        for (i, param) in BL_PARAMS
            .iter()
            .enumerate()
        {
            assert_eq!(config.get(param), i as u32 + 100);
            assert!(text.contains(&format!("{} = {}", param.config_key, i + 100)));
        }
    }

    #[test]
    fn test_validate_domains() {
        let check = BlParam::by_config_key("enter_bl_check").unwrap();
        assert!(check.validate(1, None).is_ok());
        assert!(check.validate(2, None).is_err());

        let exit = BlParam::by_config_key("exit_bl_mode").unwrap();
        assert!(exit.validate(2, None).is_ok());
        assert!(exit.validate(3, None).is_err());

        let addr = BlParam::by_config_key("i2c_addr").unwrap();
        assert!(addr.validate(3, Some(&Version::new(3, 0, 0))).is_ok());
        assert!(matches!(
            addr.validate(4, Some(&Version::new(3, 0, 0))),
            Err(Error::InvalidConfig(_))
        ));
        assert!(addr.validate(0x55, Some(&I2C_ADDR_VERSION)).is_ok());
    }

    #[test]
    fn test_command_arg() {
        let pin = BlParam::by_config_key("ebl_pin").unwrap();
        assert_eq!(pin.command_arg(9), "0 9");
        let timeout = BlParam::by_config_key("ebl_timeout").unwrap();
        assert_eq!(timeout.command_arg(9), "9");
    }

    #[test]
    fn test_describe() {
        let exit = BlParam::by_config_key("exit_bl_mode").unwrap();
        assert_eq!(exit.describe(1, None), "Wait for programmable delay");
        let pol = BlParam::by_config_key("ebl_pol").unwrap();
        assert_eq!(pol.describe(1, None), "active high");
        let pin = BlParam::by_config_key("ebl_pin").unwrap();
        assert_eq!(pin.describe(7, None), "7");
    }

    #[test]
    fn test_boot_config_parse() {
        let config = BootConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.ebl_pin, 7);
        assert_eq!(config.i2c_addr, 2);
        let values: Vec<u32> = config
            .entries()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, [1, 7, 0, 1, 1, 1, 0, 2, 1, 0, 10, 1]);
    }

    #[test]
    fn test_boot_config_rejects_bad_input() {
        let missing = SAMPLE.replace("swd_lock = 0\n", "");
        assert!(matches!(
            BootConfig::parse(&missing),
            Err(Error::InvalidConfig(_))
        ));

        let out_of_range = SAMPLE.replace("exit_bl_mode = 1", "exit_bl_mode = 7");
        assert!(BootConfig::parse(&out_of_range).is_err());

        let unknown = format!("{SAMPLE}bogus = 1\n");
        assert!(BootConfig::parse(&unknown).is_err());
    }

    #[test]
    fn test_boot_config_toml_round_trip() {
        let config = BootConfig::parse(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[BootConfig]"));
        assert_eq!(BootConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_device_config_from_response() {
        let legacy = DeviceConfig::from_response(&readback(), Some(Version::new(3, 4, 0))).unwrap();
        assert_eq!(legacy.get("ebl_pol"), Some(1));
        assert_eq!(legacy.get("ebl_timeout"), Some(5));

        let described = legacy.describe();
        assert_eq!(described.len(), 12);
        assert_eq!(described[7], ("I2C address", "0x5C".to_string()));
        assert_eq!(
            described[11].1,
            "remain in bootloader until receive exit command"
        );

        let modern = DeviceConfig::from_response(&readback(), Some(Version::new(3, 4, 2))).unwrap();
        assert_eq!(modern.describe()[7].1, "2");
        assert_eq!(modern.to_boot_config().ebl_pol, 1);
    }

    #[test]
    fn test_device_config_missing_key() {
        let rsp = CommandResponse::parse("get_cfg err=0 ebl_pin=7\n").unwrap();
        assert!(DeviceConfig::from_response(&rsp, None).is_err());
    }
}
