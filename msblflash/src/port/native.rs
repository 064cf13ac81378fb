//! Serial link to the host MCU using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, SerialConfig},
    },
    log::{debug, trace},
    serialport::{ClearBuffer, SerialPort},
    std::io::{self, Read, Write},
};

/// Control line levels applied right after opening.
///
/// The host MCU firmware only starts talking once a terminal asserts DTR;
/// RTS stays released since some USB bridges wire it to the target reset.
const HOST_DTR: bool = true;
const HOST_RTS: bool = false;

/// Serial port attached to the host MCU.
pub struct NativePort {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl NativePort {
    /// Open the host MCU port at the configured baud rate and read timeout.
    ///
    /// Failures name the host port so the caller can tell a missing adapter
    /// from a protocol problem.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let name = config.port_name.clone();
        let open_err = |source: serialport::Error| Error::HostPort {
            port: name.clone(),
            source,
        };

        let mut port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(open_err)?;
        port.write_data_terminal_ready(HOST_DTR)
            .map_err(open_err)?;
        port.write_request_to_send(HOST_RTS)
            .map_err(open_err)?;

        debug!(
            "Opened host port {name} at {} baud (timeout {:?})",
            config.baud_rate, config.timeout
        );
        Ok(Self {
            port: Some(port),
            name,
        })
    }

    fn link(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "host port closed"))
    }
}

impl Port for NativePort {
    fn clear_buffers(&mut self) -> Result<()> {
        let name = self.name.clone();
        self.link()?
            .clear(ClearBuffer::All)
            .map_err(|source| Error::HostPort { port: name, source })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if self
            .port
            .take()
            .is_some()
        {
            trace!("Closed host port {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.link()?
            .read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.link()?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.link()?
            .flush()
    }
}
