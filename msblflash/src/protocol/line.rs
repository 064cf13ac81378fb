//! Line-oriented command/response engine.
//!
//! The bootloader answers every command with one text line of
//! space-separated tokens:
//!
//! ```text
//! <echo> err=<int> key=value key ...
//! ```
//!
//! The first token is the echoed command name (or a device tag) and is
//! ignored. A line is only accepted once it carries an integer `err`
//! token; anything else is treated as line noise and another line is read.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::command::Command;

/// Key carrying the mandatory status code.
pub const STATUS_KEY: &str = "err";

/// Size of each raw write when streaming page payloads.
pub const RAW_CHUNK_SIZE: usize = 16;

/// Lines shorter than this (terminator included) are noise.
const MIN_LINE_LEN: usize = 2;

/// Decoded response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    status: i32,
    fields: BTreeMap<String, String>,
}

impl CommandResponse {
    /// Decode a response line.
    ///
    /// Returns `None` when the line has no integer `err` token.
    pub fn parse(line: &str) -> Option<Self> {
        let fields = decode_tokens(line);
        let status = fields
            .get(STATUS_KEY)?
            .trim()
            .parse()
            .ok()?;
        Some(Self { status, fields })
    }

    /// Status code (0 = success).
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Whether the device reported success.
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Look up a reported value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
    }

    /// All decoded key/value pairs, including `err`.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Convert a nonzero status into [`Error::Device`].
    pub fn check(self, command: &Command) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::Device {
                command: command.name(),
                status: self.status,
            })
        }
    }
}

/// Split a response line into its key/value map.
///
/// The first token is skipped. `key=value` gives a pair; a token without
/// `=` (or with more than one) maps its key to the empty string.
pub fn decode_tokens(line: &str) -> BTreeMap<String, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = BTreeMap::new();

    for token in line
        .split(' ')
        .skip(1)
        .filter(|t| !t.is_empty())
    {
        let mut parts = token.split('=');
        let key = parts
            .next()
            .unwrap_or_default();
        let value = match (parts.next(), parts.next()) {
            (Some(value), None) => value,
            _ => "",
        };
        fields.insert(key.to_string(), value.to_string());
    }

    fields
}

/// Retry policy for malformed response lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Noise or incomplete lines tolerated per response.
    pub max_retries: u32,
    /// Wall-clock limit for obtaining one valid response.
    pub response_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_retries: 32,
            response_timeout: Duration::from_secs(600),
        }
    }
}

/// Request/response engine on top of a [`Port`].
pub struct LineProtocol<P: Port> {
    port: P,
    config: ProtocolConfig,
}

impl<P: Port> LineProtocol<P> {
    /// Create an engine with the default retry policy.
    pub fn new(port: P) -> Self {
        Self::with_config(port, ProtocolConfig::default())
    }

    /// Create an engine with a custom retry policy.
    pub fn with_config(port: P, config: ProtocolConfig) -> Self {
        Self { port, config }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Send a command and wait for its response.
    ///
    /// A nonzero status is returned as a normal response; callers decide
    /// whether it is fatal.
    pub fn send_command(&mut self, command: &Command) -> Result<CommandResponse> {
        let line = command.to_line();
        debug!("> {}", line.trim_end());
        self.port
            .write_all_bytes(line.as_bytes())?;
        self.read_response(&command.name())
    }

    /// Stream raw bytes in fixed [`RAW_CHUNK_SIZE`] writes.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(RAW_CHUNK_SIZE) {
            self.port
                .write_all_bytes(chunk)?;
        }
        trace!("Wrote {} raw bytes", data.len());
        Ok(())
    }

    /// Read lines until one carries a valid `err` status.
    pub fn read_response(&mut self, context: &str) -> Result<CommandResponse> {
        let start = Instant::now();
        let mut retries = 0u32;

        loop {
            let raw = self.read_line()?;

            if raw.len() >= MIN_LINE_LEN {
                let line = String::from_utf8_lossy(&raw);
                trace!("< {}", line.trim_end());
                if let Some(response) = CommandResponse::parse(&line) {
                    debug!("< {context}: err={} {:?}", response.status, response.fields);
                    return Ok(response);
                }
                warn!("Incomplete response for {context}: {:?}", line.trim_end());
            } else {
                warn!("Empty response for {context} (len {}), retrying", raw.len());
            }

            retries += 1;
            if retries > self.config.max_retries {
                return Err(Error::ProtocolTimeout(format!(
                    "no valid response to {context} after {retries} lines"
                )));
            }
            if start.elapsed() > self.config.response_timeout {
                return Err(Error::ProtocolTimeout(format!(
                    "no valid response to {context} within {:?}",
                    self.config.response_timeout
                )));
            }
        }
    }

    /// Read one line, terminator included.
    ///
    /// A read timeout ends the line early, so a silent link produces an
    /// empty line rather than an error.
    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        return Ok(line);
                    }
                },
                Ok(_) => return Ok(line),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(line),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}
